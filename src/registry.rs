//! Live metric storage: families keyed by escaped name, slots keyed by label
//! values, with conflict rejection and TTL-based eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use quanta::{Clock, Instant};
use thiserror::Error;

use crate::event::Labels;
use crate::formatting::{write_help_line, write_metric_line, write_type_line};
use crate::histogram::Histogram;
use crate::mapper::MetricMapping;
use crate::summary::Summary;

/// Default summary quantiles for timers without a per-mapping override.
pub const DEFAULT_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

/// Default histogram buckets for timers without a per-mapping override,
/// spanning 5ms to 10s of observed seconds.
pub const DEFAULT_BUCKETS: [f64; 11] =
    [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// The accumulator kind a registry family holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
    /// A float counter.
    Counter,
    /// A float gauge.
    Gauge,
    /// A bucketed histogram.
    Histogram,
    /// A quantile summary.
    Summary,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

/// Why an event could not be applied to the registry.
///
/// Conflicting requests never mutate existing state.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum MetricConflict {
    /// The family exists with a different label key-set.
    #[error("label names do not match the ones the metric was created with")]
    InconsistentLabelNames,

    /// The family exists with a different accumulator kind.
    #[error("metric was already registered as a different kind")]
    MismatchedKind,
}

/// Cheap cloneable handle to a counter slot.
///
/// The total is an `f64` stored as bits in an atomic, since sampling factors
/// make fractional increments legal.
#[derive(Clone, Debug, Default)]
pub struct CounterHandle {
    inner: Arc<AtomicU64>,
}

impl CounterHandle {
    /// Adds `value` to the total.
    pub fn add(&self, value: f64) {
        let _ = self.inner.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some((f64::from_bits(current) + value).to_bits())
        });
    }

    /// The current total.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Acquire))
    }
}

/// Cheap cloneable handle to a gauge slot.
#[derive(Clone, Debug, Default)]
pub struct GaugeHandle {
    inner: Arc<AtomicU64>,
}

impl GaugeHandle {
    /// Replaces the current value.
    pub fn set(&self, value: f64) {
        self.inner.store(value.to_bits(), Ordering::Release);
    }

    /// Adjusts the current value; used for relative gauge samples.
    pub fn add(&self, value: f64) {
        let _ = self.inner.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some((f64::from_bits(current) + value).to_bits())
        });
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Acquire))
    }
}

/// Cheap cloneable handle to a histogram slot.
#[derive(Clone)]
pub struct HistogramHandle {
    inner: Arc<Mutex<Histogram>>,
}

impl HistogramHandle {
    fn new(histogram: Histogram) -> Self {
        HistogramHandle { inner: Arc::new(Mutex::new(histogram)) }
    }

    /// Records one observation.
    pub fn observe(&self, value: f64) {
        self.inner.lock().observe(value);
    }

    fn snapshot(&self) -> Histogram {
        self.inner.lock().clone()
    }
}

/// Cheap cloneable handle to a summary slot.
#[derive(Clone)]
pub struct SummaryHandle {
    inner: Arc<Mutex<Summary>>,
}

impl SummaryHandle {
    fn new(summary: Summary) -> Self {
        SummaryHandle { inner: Arc::new(Mutex::new(summary)) }
    }

    /// Records one observation.
    pub fn observe(&self, value: f64) {
        self.inner.lock().observe(value);
    }

    fn snapshot(&self) -> Summary {
        self.inner.lock().clone()
    }
}

#[derive(Clone)]
enum Accumulator {
    Counter(CounterHandle),
    Gauge(GaugeHandle),
    Histogram(HistogramHandle),
    Summary(SummaryHandle, Arc<Vec<f64>>),
}

struct Slot {
    accumulator: Accumulator,
    ttl: Duration,
    last_seen: Instant,
}

struct Family {
    label_keys: Vec<String>,
    help: String,
    kind: MetricKind,
    slots: IndexMap<Vec<String>, Slot>,
}

/// Fallback accumulator configuration for slots whose mapping carries none.
#[derive(Clone, Debug)]
pub struct RegistryDefaults {
    /// Summary quantiles.
    pub quantiles: Vec<f64>,
    /// Histogram bucket upper bounds.
    pub buckets: Vec<f64>,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        RegistryDefaults {
            quantiles: DEFAULT_QUANTILES.to_vec(),
            buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

/// The keyed store of live translated metrics.
///
/// All mutation is funneled through the exporter task; the interior lock
/// exists to admit the scrape task, which only ever takes read snapshots.
pub struct Registry {
    families: RwLock<HashMap<String, Family>>,
    clock: Clock,
    defaults: RegistryDefaults,
}

impl Registry {
    /// Creates a registry reading time from `clock`.
    ///
    /// Tests pass the clock from [`quanta::Clock::mock`] to drive eviction
    /// deterministically.
    pub fn new(clock: Clock, defaults: RegistryDefaults) -> Self {
        Registry { families: RwLock::new(HashMap::new()), clock, defaults }
    }

    fn upsert(
        &self,
        name: &str,
        labels: &Labels,
        help: &str,
        mapping: &MetricMapping,
        kind: MetricKind,
        init: impl FnOnce() -> Accumulator,
    ) -> Result<Accumulator, MetricConflict> {
        let mut families = self.families.write();
        let family = families.entry(name.to_string()).or_insert_with(|| Family {
            label_keys: labels.keys().cloned().collect(),
            help: help.to_string(),
            kind,
            slots: IndexMap::new(),
        });

        if family.kind != kind {
            return Err(MetricConflict::MismatchedKind);
        }
        if !family.label_keys.iter().eq(labels.keys()) {
            return Err(MetricConflict::InconsistentLabelNames);
        }

        let values: Vec<String> = labels.values().cloned().collect();
        let now = self.clock.now();
        let slot = family.slots.entry(values).or_insert_with(|| Slot {
            accumulator: init(),
            ttl: mapping.ttl,
            last_seen: now,
        });
        slot.last_seen = now;
        Ok(slot.accumulator.clone())
    }

    /// Locates or creates the counter slot for `(name, labels)`.
    pub fn get_counter(
        &self,
        name: &str,
        labels: &Labels,
        help: &str,
        mapping: &MetricMapping,
    ) -> Result<CounterHandle, MetricConflict> {
        match self.upsert(name, labels, help, mapping, MetricKind::Counter, || {
            Accumulator::Counter(CounterHandle::default())
        })? {
            Accumulator::Counter(handle) => Ok(handle),
            _ => Err(MetricConflict::MismatchedKind),
        }
    }

    /// Locates or creates the gauge slot for `(name, labels)`.
    pub fn get_gauge(
        &self,
        name: &str,
        labels: &Labels,
        help: &str,
        mapping: &MetricMapping,
    ) -> Result<GaugeHandle, MetricConflict> {
        match self.upsert(name, labels, help, mapping, MetricKind::Gauge, || {
            Accumulator::Gauge(GaugeHandle::default())
        })? {
            Accumulator::Gauge(handle) => Ok(handle),
            _ => Err(MetricConflict::MismatchedKind),
        }
    }

    /// Locates or creates the histogram slot for `(name, labels)`, configured
    /// from the mapping's buckets or the registry defaults.
    pub fn get_histogram(
        &self,
        name: &str,
        labels: &Labels,
        help: &str,
        mapping: &MetricMapping,
    ) -> Result<HistogramHandle, MetricConflict> {
        let bounds = mapping.buckets.as_deref().unwrap_or(&self.defaults.buckets);
        match self.upsert(name, labels, help, mapping, MetricKind::Histogram, || {
            Accumulator::Histogram(HistogramHandle::new(Histogram::new(bounds)))
        })? {
            Accumulator::Histogram(handle) => Ok(handle),
            _ => Err(MetricConflict::MismatchedKind),
        }
    }

    /// Locates or creates the summary slot for `(name, labels)`, configured
    /// from the mapping's quantiles or the registry defaults.
    pub fn get_summary(
        &self,
        name: &str,
        labels: &Labels,
        help: &str,
        mapping: &MetricMapping,
    ) -> Result<SummaryHandle, MetricConflict> {
        let quantiles =
            mapping.quantiles.clone().unwrap_or_else(|| self.defaults.quantiles.clone());
        match self.upsert(name, labels, help, mapping, MetricKind::Summary, || {
            Accumulator::Summary(SummaryHandle::new(Summary::with_defaults()), Arc::new(quantiles))
        })? {
            Accumulator::Summary(handle, _) => Ok(handle),
            _ => Err(MetricConflict::MismatchedKind),
        }
    }

    /// Removes every slot whose TTL has elapsed since its last activity.
    ///
    /// Slots with a zero TTL never expire. Families that empty out are
    /// removed entirely.
    pub fn remove_stale_metrics(&self) {
        let now = self.clock.now();
        let mut families = self.families.write();
        families.retain(|_, family| {
            family.slots.retain(|_, slot| {
                slot.ttl.is_zero() || now - slot.last_seen <= slot.ttl
            });
            !family.slots.is_empty()
        });
    }

    /// Appends every live metric to `buffer` in exposition format.
    ///
    /// Takes a read snapshot, so scraping is safe concurrently with the
    /// exporter's writes and observes either pre- or post-eviction state,
    /// never a partial one.
    pub fn render(&self, buffer: &mut String) {
        let families = self.families.read();
        let mut names: Vec<&String> = families.keys().collect();
        names.sort();

        for name in names {
            let family = &families[name.as_str()];
            write_help_line(buffer, name, &family.help);
            write_type_line(buffer, name, family.kind.as_str());

            for (values, slot) in &family.slots {
                match &slot.accumulator {
                    Accumulator::Counter(counter) => {
                        write_metric_line::<&str, f64>(
                            buffer,
                            name,
                            None,
                            &family.label_keys,
                            values,
                            None,
                            counter.get(),
                        );
                    }
                    Accumulator::Gauge(gauge) => {
                        write_metric_line::<&str, f64>(
                            buffer,
                            name,
                            None,
                            &family.label_keys,
                            values,
                            None,
                            gauge.get(),
                        );
                    }
                    Accumulator::Histogram(histogram) => {
                        let histogram = histogram.snapshot();
                        for (le, count) in histogram.buckets() {
                            write_metric_line(
                                buffer,
                                name,
                                Some("bucket"),
                                &family.label_keys,
                                values,
                                Some(("le", le)),
                                count,
                            );
                        }
                        write_metric_line(
                            buffer,
                            name,
                            Some("bucket"),
                            &family.label_keys,
                            values,
                            Some(("le", "+Inf")),
                            histogram.count(),
                        );
                        write_metric_line::<&str, f64>(
                            buffer,
                            name,
                            Some("sum"),
                            &family.label_keys,
                            values,
                            None,
                            histogram.sum(),
                        );
                        write_metric_line::<&str, u64>(
                            buffer,
                            name,
                            Some("count"),
                            &family.label_keys,
                            values,
                            None,
                            histogram.count(),
                        );
                    }
                    Accumulator::Summary(summary, quantiles) => {
                        let summary = summary.snapshot();
                        for quantile in quantiles.iter() {
                            write_metric_line(
                                buffer,
                                name,
                                None,
                                &family.label_keys,
                                values,
                                Some(("quantile", *quantile)),
                                summary.quantile(*quantile).unwrap_or(0.0),
                            );
                        }
                        write_metric_line::<&str, f64>(
                            buffer,
                            name,
                            Some("sum"),
                            &family.label_keys,
                            values,
                            None,
                            summary.sum(),
                        );
                        write_metric_line::<&str, usize>(
                            buffer,
                            name,
                            Some("count"),
                            &family.label_keys,
                            values,
                            None,
                            summary.count(),
                        );
                    }
                }
            }
            buffer.push('\n');
        }
    }
}
