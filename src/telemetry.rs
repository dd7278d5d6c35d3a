//! Internal counters describing what the bridge itself is doing, rendered
//! into the scrape output alongside the translated metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::MetricType;
use crate::formatting::{write_help_line, write_metric_line, write_type_line};
use crate::mapper::ActionType;

/// Reasons a line or sample can be discarded by the parser.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SampleError {
    /// The line had no value section, an empty name, or invalid UTF-8.
    MalformedLine,
    /// A sample had a wrong number of `|`-separated components, or an empty one.
    MalformedComponent,
    /// The sample value did not parse as a float.
    MalformedValue,
    /// The `@` suffix did not parse, or a suffix had an unknown leading byte.
    InvalidSampleFactor,
    /// Inline name-tags and DogStatsD tag suffixes were combined on one line.
    MixedTaggingStyles,
    /// The stat type is unsupported (`s`) or unknown.
    IllegalEvent,
}

impl SampleError {
    const ALL: [SampleError; 6] = [
        SampleError::MalformedLine,
        SampleError::MalformedComponent,
        SampleError::MalformedValue,
        SampleError::InvalidSampleFactor,
        SampleError::MixedTaggingStyles,
        SampleError::IllegalEvent,
    ];

    /// The `reason` label value for this error.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleError::MalformedLine => "malformed_line",
            SampleError::MalformedComponent => "malformed_component",
            SampleError::MalformedValue => "malformed_value",
            SampleError::InvalidSampleFactor => "invalid_sample_factor",
            SampleError::MixedTaggingStyles => "mixed_tagging_styles",
            SampleError::IllegalEvent => "illegal_event",
        }
    }
}

/// Reasons an otherwise well-formed event can be discarded by the exporter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventError {
    /// A matched mapping produced an empty target name.
    EmptyMetricName,
    /// A counter event carried a negative increment.
    IllegalNegativeCounter,
}

impl EventError {
    const ALL: [EventError; 2] =
        [EventError::EmptyMetricName, EventError::IllegalNegativeCounter];

    /// The `reason` label value for this error.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventError::EmptyMetricName => "empty_metric_name",
            EventError::IllegalNegativeCounter => "illegal_negative_counter",
        }
    }
}

const METRIC_TYPES: [MetricType; 3] =
    [MetricType::Counter, MetricType::Gauge, MetricType::Timer];

const ACTIONS: [ActionType; 2] = [ActionType::Map, ActionType::Drop];

/// Operational counters for the whole pipeline.
///
/// One instance is shared by the listeners, the parser, and the exporter;
/// everything is a plain atomic so any task can account without coordination.
#[derive(Debug, Default)]
pub struct Telemetry {
    udp_packets: AtomicU64,
    tcp_connections: AtomicU64,
    tcp_errors: AtomicU64,
    tcp_line_too_long: AtomicU64,
    unixgram_packets: AtomicU64,
    lines_received: AtomicU64,
    samples_received: AtomicU64,
    tags_received: AtomicU64,
    tag_errors: AtomicU64,
    sample_errors: [AtomicU64; 6],
    events: [AtomicU64; 3],
    events_actions: [AtomicU64; 2],
    events_unmapped: AtomicU64,
    events_conflict: [AtomicU64; 3],
    event_errors: [AtomicU64; 2],
}

impl Telemetry {
    /// Creates a zeroed set of counters.
    pub fn new() -> Self {
        Telemetry::default()
    }

    pub(crate) fn increment_udp_packets(&self) {
        self.udp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_tcp_connections(&self) {
        self.tcp_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_tcp_errors(&self) {
        self.tcp_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_tcp_line_too_long(&self) {
        self.tcp_line_too_long.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_unixgram_packets(&self) {
        self.unixgram_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_lines(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_samples(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_tags(&self) {
        self.tags_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_tag_errors(&self) {
        self.tag_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_sample_error(&self, reason: SampleError) {
        self.sample_errors[reason as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_events(&self, metric_type: MetricType) {
        self.events[metric_type as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_action(&self, action: ActionType) {
        self.events_actions[action as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_unmapped(&self) {
        self.events_unmapped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_conflict(&self, metric_type: MetricType) {
        self.events_conflict[metric_type as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_event_error(&self, reason: EventError) {
        self.event_errors[reason as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sample_error_count(&self, reason: SampleError) -> u64 {
        self.sample_errors[reason as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn event_error_count(&self, reason: EventError) -> u64 {
        self.event_errors[reason as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn conflict_count(&self, metric_type: MetricType) -> u64 {
        self.events_conflict[metric_type as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn tag_error_count(&self) -> u64 {
        self.tag_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn tcp_line_too_long_count(&self) -> u64 {
        self.tcp_line_too_long.load(Ordering::Relaxed)
    }

    /// Appends every operational counter to `buffer` in exposition format.
    pub(crate) fn render(&self, buffer: &mut String) {
        let simple = [
            (
                "statsd_bridge_udp_packets_total",
                "The total number of StatsD packets received over UDP.",
                &self.udp_packets,
            ),
            (
                "statsd_bridge_tcp_connections_total",
                "The total number of TCP connections handled.",
                &self.tcp_connections,
            ),
            (
                "statsd_bridge_tcp_connection_errors_total",
                "The number of errors encountered reading from TCP.",
                &self.tcp_errors,
            ),
            (
                "statsd_bridge_tcp_too_long_lines_total",
                "The number of lines discarded due to being too long.",
                &self.tcp_line_too_long,
            ),
            (
                "statsd_bridge_unixgram_packets_total",
                "The total number of StatsD packets received over unixgram sockets.",
                &self.unixgram_packets,
            ),
            (
                "statsd_bridge_lines_total",
                "The total number of StatsD lines received.",
                &self.lines_received,
            ),
            (
                "statsd_bridge_samples_total",
                "The total number of StatsD samples received.",
                &self.samples_received,
            ),
            (
                "statsd_bridge_tags_total",
                "The total number of DogStatsD tags processed.",
                &self.tags_received,
            ),
            (
                "statsd_bridge_tag_errors_total",
                "The number of DogStatsD tags that could not be parsed.",
                &self.tag_errors,
            ),
            (
                "statsd_bridge_events_unmapped_total",
                "The total number of events no mapping was found for.",
                &self.events_unmapped,
            ),
        ];

        for (name, help, counter) in simple {
            write_help_line(buffer, name, help);
            write_type_line(buffer, name, "counter");
            write_metric_line::<&str, u64>(
                buffer,
                name,
                None,
                &[],
                &[],
                None,
                counter.load(Ordering::Relaxed),
            );
            buffer.push('\n');
        }

        let name = "statsd_bridge_sample_errors_total";
        write_help_line(buffer, name, "The total number of errors parsing StatsD samples.");
        write_type_line(buffer, name, "counter");
        for reason in SampleError::ALL {
            write_metric_line(
                buffer,
                name,
                None,
                &[],
                &[],
                Some(("reason", reason.as_str())),
                self.sample_errors[reason as usize].load(Ordering::Relaxed),
            );
        }
        buffer.push('\n');

        let name = "statsd_bridge_events_total";
        write_help_line(buffer, name, "The total number of StatsD events processed.");
        write_type_line(buffer, name, "counter");
        for metric_type in METRIC_TYPES {
            write_metric_line(
                buffer,
                name,
                None,
                &[],
                &[],
                Some(("type", metric_type.as_str())),
                self.events[metric_type as usize].load(Ordering::Relaxed),
            );
        }
        buffer.push('\n');

        let name = "statsd_bridge_events_actions_total";
        write_help_line(buffer, name, "The total number of mapper actions performed.");
        write_type_line(buffer, name, "counter");
        for action in ACTIONS {
            write_metric_line(
                buffer,
                name,
                None,
                &[],
                &[],
                Some(("action", action.as_str())),
                self.events_actions[action as usize].load(Ordering::Relaxed),
            );
        }
        buffer.push('\n');

        let name = "statsd_bridge_events_conflict_total";
        write_help_line(buffer, name, "The total number of events with conflicting registrations.");
        write_type_line(buffer, name, "counter");
        for metric_type in METRIC_TYPES {
            write_metric_line(
                buffer,
                name,
                None,
                &[],
                &[],
                Some(("type", metric_type.as_str())),
                self.events_conflict[metric_type as usize].load(Ordering::Relaxed),
            );
        }
        buffer.push('\n');

        let name = "statsd_bridge_event_errors_total";
        write_help_line(buffer, name, "The total number of events discarded as invalid.");
        write_type_line(buffer, name, "counter");
        for reason in EventError::ALL {
            write_metric_line(
                buffer,
                name,
                None,
                &[],
                &[],
                Some(("reason", reason.as_str())),
                self.event_errors[reason as usize].load(Ordering::Relaxed),
            );
        }
        buffer.push('\n');
    }
}
