//! Translated telemetry samples and the channel contract between the
//! listeners and the exporter.

use std::collections::BTreeMap;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Labels attached to an event, keyed in canonical (sorted) order.
pub type Labels = BTreeMap<String, String>;

/// An ordered batch of events produced from one input line.
pub type Events = Vec<Event>;

/// The StatsD-side type of a sample, as seen by the mapper.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// A monotonically increasing count (`c`).
    Counter,
    /// A point-in-time or relative value (`g`).
    Gauge,
    /// A duration observation in milliseconds (`ms`, `h`, `d`).
    Timer,
}

impl MetricType {
    /// The lowercase name used in configuration and telemetry labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Timer => "timer",
        }
    }
}

/// A single translated sample.
///
/// Events carry the raw, untranslated metric name so the mapper can be
/// queried downstream, together with the labels extracted from either inline
/// tag dialect.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A counter increment.
    Counter {
        /// Raw metric name.
        name: String,
        /// Increment to apply; negative values are rejected downstream.
        value: f64,
        /// Labels extracted from the line.
        labels: Labels,
    },
    /// A gauge update.
    Gauge {
        /// Raw metric name.
        name: String,
        /// Value to set, or adjustment to apply when `relative`.
        value: f64,
        /// Whether the sample had a `+`/`-` prefix and adjusts the current
        /// value rather than replacing it.
        relative: bool,
        /// Labels extracted from the line.
        labels: Labels,
    },
    /// A timer observation, in milliseconds.
    Timer {
        /// Raw metric name.
        name: String,
        /// Observed duration in milliseconds.
        value: f64,
        /// Labels extracted from the line.
        labels: Labels,
    },
}

impl Event {
    /// The raw, pre-mapping metric name.
    pub fn metric_name(&self) -> &str {
        match self {
            Event::Counter { name, .. } | Event::Gauge { name, .. } | Event::Timer { name, .. } => {
                name
            }
        }
    }

    /// The StatsD-side type of this event.
    pub fn metric_type(&self) -> MetricType {
        match self {
            Event::Counter { .. } => MetricType::Counter,
            Event::Gauge { .. } => MetricType::Gauge,
            Event::Timer { .. } => MetricType::Timer,
        }
    }

    /// The sample value.
    pub fn value(&self) -> f64 {
        match self {
            Event::Counter { value, .. }
            | Event::Gauge { value, .. }
            | Event::Timer { value, .. } => *value,
        }
    }

    /// The labels extracted from the line this event came from.
    pub fn labels(&self) -> &Labels {
        match self {
            Event::Counter { labels, .. }
            | Event::Gauge { labels, .. }
            | Event::Timer { labels, .. } => labels,
        }
    }
}

/// The producing half of the event pipeline.
///
/// Every listener holds a clone. The channel is bounded: when the exporter
/// falls behind, `queue` suspends the listener rather than dropping batches.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Events>,
}

impl EventSender {
    /// Wraps the sending half of the event channel.
    pub fn new(tx: mpsc::Sender<Events>) -> Self {
        EventSender { tx }
    }

    /// Queues one batch of events for the exporter, applying backpressure.
    ///
    /// A closed channel means the exporter has stopped; the batch is dropped.
    pub async fn queue(&self, events: Events) {
        if self.tx.send(events).await.is_err() {
            debug!("event channel closed, dropping batch");
        }
    }
}
