//! Bridges line-oriented StatsD telemetry into a Prometheus-style scrape
//! endpoint.
//!
//! The bridge listens for StatsD samples over UDP, TCP, and unix-datagram
//! sockets, understands the vanilla, Librato/InfluxDB, and DogStatsD tag
//! dialects, rewrites dotted StatsD names into structured labeled metric
//! identities through a declarative mapping rule set, and accumulates the
//! results as counters, gauges, histograms, and summaries with TTL-based
//! eviction of idle series.
//!
//! # Usage
//!
//! ```no_run
//! use statsd_bridge::BridgeBuilder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mapping = r#"
//! defaults:
//!   ttl: 300
//! mappings:
//!   - match: "test.dispatcher.*"
//!     name: "dispatcher_events_total"
//!     labels:
//!       outcome: "$1"
//! "#;
//!
//!     let (bridge, _handle) = BridgeBuilder::new()
//!         .mapping_yaml(mapping)
//!         .expect("mapping should parse")
//!         .build()
//!         .expect("configuration should be valid");
//!
//!     // Binds the sockets, spawns the listeners and the scrape endpoint,
//!     // and consumes events until shutdown.
//!     bridge.run().await.expect("failed to run bridge");
//! }
//! ```
//!
//! The returned [`ScrapeHandle`] can render the exposition text directly for
//! embedding into an existing HTTP server instead of the built-in one.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{Bridge, BridgeBuilder, BuildError};

mod event;
pub use self::event::{Event, EventSender, Events, Labels, MetricType};

mod exporter;
pub use self::exporter::Exporter;

mod formatting;
pub use self::formatting::escape_metric_name;

mod histogram;

pub mod listener;

mod mapper;
pub use self::mapper::{
    ActionType, MapperDefaults, MapperError, MappingConfig, MappingRule, MatchType, MetricMapper,
    MetricMapping, TimerKind,
};

mod parser;
pub use self::parser::line_to_events;

mod registry;
pub use self::registry::{
    CounterHandle, GaugeHandle, HistogramHandle, MetricConflict, MetricKind, Registry,
    RegistryDefaults, SummaryHandle, DEFAULT_BUCKETS, DEFAULT_QUANTILES,
};

mod scrape;
pub use self::scrape::ScrapeHandle;

mod summary;

mod telemetry;
pub use self::telemetry::{EventError, SampleError, Telemetry};
