//! A quantile summary accumulator with relative-error guarantees.

use sketches_ddsketch::{Config, DDSketch};

/// Estimates quantiles over an arbitrary stream of floating-point samples.
///
/// Backed by [DDSketch](https://arxiv.org/abs/1908.10693). Negative samples
/// are held in a mirrored sketch and values inside the `(-min_value,
/// min_value)` band are counted as zeroes, so the full real line is covered
/// while keeping the sketch's relative-error guarantee.
#[derive(Clone)]
pub struct Summary {
    negative: DDSketch,
    positive: DDSketch,
    min_value: f64,
    zeroes: usize,
    sum: f64,
}

impl Summary {
    /// Creates a summary with the given relative error `alpha`, maximum
    /// bucket count, and smallest value distinguishable from zero.
    pub fn new(alpha: f64, max_buckets: u32, min_value: f64) -> Summary {
        let config = Config::new(alpha, max_buckets, min_value.abs());

        Summary {
            negative: DDSketch::new(config.clone()),
            positive: DDSketch::new(config),
            min_value: min_value.abs(),
            zeroes: 0,
            sum: 0.0,
        }
    }

    /// Creates a summary with a 0.01% relative error, 32,768 buckets, and a
    /// one-nanosecond zero band, suitable for observations in seconds.
    pub fn with_defaults() -> Summary {
        Summary::new(0.0001, 32_768, 1.0e-9)
    }

    /// Adds a sample to the summary.
    pub fn observe(&mut self, value: f64) {
        self.sum += value;

        if value.abs() <= self.min_value {
            self.zeroes += 1;
        } else if value > 0.0 {
            self.positive.add(value);
        } else {
            self.negative.add(-value);
        }
    }

    /// Estimates the value at quantile `q`.
    ///
    /// Returns `None` when the summary is empty or `q` is outside `[0, 1]`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if !(0.0..=1.0).contains(&q) {
            return None;
        }

        let ncount = self.negative.count();
        let pcount = self.positive.count();
        let zcount = self.zeroes;
        let total = ncount + pcount + zcount;
        if total == 0 {
            return None;
        }

        let rank = ((q * total as f64).ceil() as usize).clamp(1, total);
        if rank <= ncount {
            // Ascending rank order runs from the most negative value, which
            // is the highest magnitude in the mirrored sketch.
            let nq = 1.0 - (rank - 1) as f64 / ncount as f64;
            self.negative.quantile(nq.clamp(0.0, 1.0)).ok().flatten().map(|v| -v)
        } else if rank <= ncount + zcount {
            Some(0.0)
        } else {
            let pq = (rank - ncount - zcount) as f64 / pcount as f64;
            self.positive.quantile(pq.clamp(0.0, 1.0)).ok().flatten()
        }
    }

    /// The total number of samples, zero-band samples included.
    pub fn count(&self) -> usize {
        self.negative.count() + self.positive.count() + self.zeroes
    }

    /// The sum of all samples.
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

/// Clamps raw quantile values into `[0, 1]`, preserving order of appearance.
pub fn clamp_quantiles(raw: &[f64]) -> Vec<f64> {
    raw.iter().map(|q| q.clamp(0.0, 1.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::{clamp_quantiles, Summary};

    #[test]
    fn test_empty_summary_has_no_quantiles() {
        let summary = Summary::with_defaults();
        assert_eq!(summary.quantile(0.5), None);
        assert_eq!(summary.count(), 0);
        assert_eq!(summary.sum(), 0.0);
    }

    #[test]
    fn test_out_of_range_quantiles() {
        let mut summary = Summary::with_defaults();
        summary.observe(1.0);
        assert_eq!(summary.quantile(-0.1), None);
        assert_eq!(summary.quantile(1.1), None);
    }

    #[test]
    fn test_quantile_estimates_are_close() {
        let mut summary = Summary::with_defaults();
        for i in 1..=1000 {
            summary.observe(f64::from(i));
        }

        assert_eq!(summary.count(), 1000);

        let median = summary.quantile(0.5).expect("summary is not empty");
        assert!((median - 500.0).abs() / 500.0 < 0.01, "median estimate {median} too far off");

        let p99 = summary.quantile(0.99).expect("summary is not empty");
        assert!((p99 - 990.0).abs() / 990.0 < 0.01, "p99 estimate {p99} too far off");
    }

    #[test]
    fn test_zero_band_and_negative_samples() {
        let mut summary = Summary::with_defaults();
        summary.observe(-10.0);
        summary.observe(0.0);
        summary.observe(10.0);

        assert_eq!(summary.count(), 3);
        assert_eq!(summary.sum(), 0.0);
        assert_eq!(summary.quantile(0.5), Some(0.0));

        let min = summary.quantile(0.0).expect("summary is not empty");
        assert!(min <= -9.9, "expected the low quantile near -10, got {min}");
    }

    #[test]
    fn test_clamp_quantiles() {
        assert_eq!(clamp_quantiles(&[-0.5, 0.5, 1.5]), vec![0.0, 0.5, 1.0]);
    }
}
