//! The single consumer of the event pipeline.
//!
//! Owns all registry mutation: drains event batches from the channel, runs
//! them through the mapper, and drives TTL eviction off a one-second tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{Event, Events, Labels, MetricType};
use crate::formatting::escape_metric_name;
use crate::mapper::{ActionType, MetricMapper, TimerKind};
use crate::registry::Registry;
use crate::telemetry::{EventError, Telemetry};

const DEFAULT_HELP: &str = "Metric autogenerated by statsd-bridge.";

/// Applies translated events to the registry.
pub struct Exporter {
    mapper: Arc<MetricMapper>,
    registry: Arc<Registry>,
    telemetry: Arc<Telemetry>,
}

impl Exporter {
    /// Creates an exporter over the given mapper and registry.
    pub fn new(
        mapper: Arc<MetricMapper>,
        registry: Arc<Registry>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Exporter { mapper, registry, telemetry }
    }

    /// Consumes event batches until the channel closes.
    ///
    /// Multiplexes between the channel and a one-second eviction tick;
    /// channel closure is the sole termination signal.
    pub async fn run(self, mut events: mpsc::Receiver<Events>) {
        let mut evict = tokio::time::interval(Duration::from_secs(1));
        evict.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = evict.tick() => self.registry.remove_stale_metrics(),
                batch = events.recv() => match batch {
                    Some(batch) => {
                        for event in batch {
                            self.handle_event(event);
                        }
                    }
                    None => {
                        debug!("event channel closed, stopping exporter");
                        return;
                    }
                },
            }
        }
    }

    /// Processes a single event according to the configured mapping.
    pub fn handle_event(&self, event: Event) {
        let lookup = self.mapper.lookup(event.metric_name(), event.metric_type());
        let matched = lookup.is_some();

        let default_mapping;
        let (mapping, extracted) = match lookup {
            Some((mapping, extracted)) => (mapping, extracted),
            None => {
                default_mapping = self.mapper.default_mapping();
                (&default_mapping, Labels::new())
            }
        };

        if mapping.action == ActionType::Drop {
            self.telemetry.increment_action(ActionType::Drop);
            return;
        }

        let help = mapping.help.as_deref().unwrap_or(DEFAULT_HELP);

        let metric_name = if matched {
            if mapping.name.is_empty() {
                debug!(metric_name = %event.metric_name(), "mapping generated an empty metric name");
                self.telemetry.increment_event_error(EventError::EmptyMetricName);
                return;
            }
            self.telemetry.increment_action(ActionType::Map);
            escape_metric_name(&mapping.name)
        } else {
            self.telemetry.increment_unmapped();
            escape_metric_name(event.metric_name())
        };

        // Mapper-extracted labels win over labels carried on the event.
        let mut labels = event.labels().clone();
        labels.extend(extracted);

        match event {
            Event::Counter { value, .. } => {
                if value < 0.0 {
                    debug!(metric = %metric_name, value, "counter must be a non-negative value");
                    self.telemetry.increment_event_error(EventError::IllegalNegativeCounter);
                    return;
                }

                match self.registry.get_counter(&metric_name, &labels, help, mapping) {
                    Ok(counter) => {
                        counter.add(value);
                        self.telemetry.increment_events(MetricType::Counter);
                    }
                    Err(error) => {
                        debug!(metric = %metric_name, %error, "failed to update metric");
                        self.telemetry.increment_conflict(MetricType::Counter);
                    }
                }
            }

            Event::Gauge { value, relative, .. } => {
                match self.registry.get_gauge(&metric_name, &labels, help, mapping) {
                    Ok(gauge) => {
                        if relative {
                            gauge.add(value);
                        } else {
                            gauge.set(value);
                        }
                        self.telemetry.increment_events(MetricType::Gauge);
                    }
                    Err(error) => {
                        debug!(metric = %metric_name, %error, "failed to update metric");
                        self.telemetry.increment_conflict(MetricType::Gauge);
                    }
                }
            }

            Event::Timer { value, .. } => {
                let kind = mapping.timer_type.unwrap_or_else(|| self.mapper.default_timer_type());

                // StatsD timers are milliseconds; observations are seconds.
                let observation = value / 1000.0;

                let result = match kind {
                    TimerKind::Histogram => self
                        .registry
                        .get_histogram(&metric_name, &labels, help, mapping)
                        .map(|histogram| histogram.observe(observation)),
                    TimerKind::Summary => self
                        .registry
                        .get_summary(&metric_name, &labels, help, mapping)
                        .map(|summary| summary.observe(observation)),
                };

                match result {
                    Ok(()) => self.telemetry.increment_events(MetricType::Timer),
                    Err(error) => {
                        debug!(metric = %metric_name, %error, "failed to update metric");
                        self.telemetry.increment_conflict(MetricType::Timer);
                    }
                }
            }
        }
    }
}
