//! Configuring and launching the bridge.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;

use quanta::Clock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::error;

use crate::event::EventSender;
use crate::exporter::Exporter;
use crate::listener::TcpListener;
use crate::listener::UdpListener;
#[cfg(unix)]
use crate::listener::UnixgramListener;
use crate::mapper::{MapperError, MappingConfig, MetricMapper};
use crate::registry::{Registry, RegistryDefaults};
use crate::scrape::{self, ScrapeHandle};
use crate::summary::clamp_quantiles;
use crate::telemetry::Telemetry;

/// Errors that can occur while building or running the bridge.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The mapping configuration did not parse or compile.
    #[error("invalid mapping configuration: {0}")]
    InvalidMapping(#[from] MapperError),

    /// Every ingress address was disabled.
    #[error("no StatsD listener configured; enable at least one ingress address")]
    MissingListener,

    /// The configured default buckets or quantiles were empty.
    #[error("default bucket bounds and quantiles cannot be empty")]
    EmptyBucketsOrQuantiles,

    /// A socket could not be bound.
    #[error("failed to bind {endpoint} listener: {source}")]
    FailedToBind {
        /// Which listener failed.
        endpoint: &'static str,
        /// The underlying socket error.
        source: io::Error,
    },
}

/// Builder for creating and launching a [`Bridge`].
pub struct BridgeBuilder {
    udp_listen_address: Option<SocketAddr>,
    tcp_listen_address: Option<SocketAddr>,
    #[cfg(unix)]
    unixgram_socket_path: Option<PathBuf>,
    http_listen_address: SocketAddr,
    mapping: MappingConfig,
    defaults: RegistryDefaults,
    queue_capacity: usize,
}

impl BridgeBuilder {
    /// Creates a builder with StatsD ingress on UDP `0.0.0.0:9125` and the
    /// scrape endpoint on `0.0.0.0:9102`.
    pub fn new() -> Self {
        BridgeBuilder {
            udp_listen_address: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9125)),
            tcp_listen_address: None,
            #[cfg(unix)]
            unixgram_socket_path: None,
            http_listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9102),
            mapping: MappingConfig::default(),
            defaults: RegistryDefaults::default(),
            queue_capacity: 1024,
        }
    }

    /// Sets or disables the UDP ingress address.
    pub fn udp_listen_address(mut self, addr: Option<SocketAddr>) -> Self {
        self.udp_listen_address = addr;
        self
    }

    /// Sets or disables the TCP ingress address.
    pub fn tcp_listen_address(mut self, addr: Option<SocketAddr>) -> Self {
        self.tcp_listen_address = addr;
        self
    }

    /// Sets or disables the unix-datagram ingress socket path.
    #[cfg(unix)]
    pub fn unixgram_socket_path(mut self, path: Option<PathBuf>) -> Self {
        self.unixgram_socket_path = path;
        self
    }

    /// Sets the address the scrape endpoint listens on.
    pub fn http_listen_address(mut self, addr: SocketAddr) -> Self {
        self.http_listen_address = addr;
        self
    }

    /// Sets the mapping rule set.
    pub fn mapping_config(mut self, config: MappingConfig) -> Self {
        self.mapping = config;
        self
    }

    /// Parses and sets the mapping rule set from its YAML form.
    pub fn mapping_yaml(mut self, yaml: &str) -> Result<Self, BuildError> {
        self.mapping = serde_yaml::from_str(yaml).map_err(MapperError::from)?;
        Ok(self)
    }

    /// Sets the summary quantiles used when a mapping carries none.
    pub fn default_quantiles(mut self, quantiles: &[f64]) -> Self {
        self.defaults.quantiles = clamp_quantiles(quantiles);
        self
    }

    /// Sets the histogram buckets used when a mapping carries none.
    pub fn default_buckets(mut self, buckets: &[f64]) -> Self {
        self.defaults.buckets = buckets.to_vec();
        self
    }

    /// Sets the bound of the event channel between listeners and exporter.
    ///
    /// When the exporter falls behind, listeners suspend on a full channel
    /// rather than dropping batches.
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Compiles the configuration into a runnable [`Bridge`] and its
    /// [`ScrapeHandle`]. Nothing is bound or spawned yet.
    pub fn build(self) -> Result<(Bridge, ScrapeHandle), BuildError> {
        #[cfg(unix)]
        let has_unixgram = self.unixgram_socket_path.is_some();
        #[cfg(not(unix))]
        let has_unixgram = false;
        if self.udp_listen_address.is_none()
            && self.tcp_listen_address.is_none()
            && !has_unixgram
        {
            return Err(BuildError::MissingListener);
        }
        if self.defaults.quantiles.is_empty() || self.defaults.buckets.is_empty() {
            return Err(BuildError::EmptyBucketsOrQuantiles);
        }

        let mapper = Arc::new(MetricMapper::new(self.mapping)?);
        let registry = Arc::new(Registry::new(Clock::new(), self.defaults));
        let telemetry = Arc::new(Telemetry::new());
        let handle = ScrapeHandle::new(Arc::clone(&registry), Arc::clone(&telemetry));

        let bridge = Bridge {
            udp_listen_address: self.udp_listen_address,
            tcp_listen_address: self.tcp_listen_address,
            #[cfg(unix)]
            unixgram_socket_path: self.unixgram_socket_path,
            http_listen_address: self.http_listen_address,
            queue_capacity: self.queue_capacity,
            mapper,
            registry,
            telemetry,
            handle: handle.clone(),
        };
        Ok((bridge, handle))
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        BridgeBuilder::new()
    }
}

/// A fully configured bridge, ready to bind its sockets and run.
pub struct Bridge {
    udp_listen_address: Option<SocketAddr>,
    tcp_listen_address: Option<SocketAddr>,
    #[cfg(unix)]
    unixgram_socket_path: Option<PathBuf>,
    http_listen_address: SocketAddr,
    queue_capacity: usize,
    mapper: Arc<MetricMapper>,
    registry: Arc<Registry>,
    telemetry: Arc<Telemetry>,
    handle: ScrapeHandle,
}

impl Bridge {
    /// Binds every configured socket, spawns one task per listener plus the
    /// scrape server, and consumes events until every listener has stopped.
    ///
    /// Listener tasks end when their socket fails; once all of them are gone
    /// the event channel closes and this future resolves.
    pub async fn run(self) -> Result<(), BuildError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let sender = EventSender::new(tx);

        if let Some(addr) = self.udp_listen_address {
            let listener = UdpListener::bind(addr, sender.clone(), Arc::clone(&self.telemetry))
                .await
                .map_err(|source| BuildError::FailedToBind { endpoint: "udp", source })?;
            tokio::spawn(async move {
                if let Err(error) = listener.listen().await {
                    error!(error = %error, "udp listener terminated");
                }
            });
        }

        if let Some(addr) = self.tcp_listen_address {
            let listener = TcpListener::bind(addr, sender.clone(), Arc::clone(&self.telemetry))
                .await
                .map_err(|source| BuildError::FailedToBind { endpoint: "tcp", source })?;
            tokio::spawn(async move {
                if let Err(error) = listener.listen().await {
                    error!(error = %error, "tcp listener terminated");
                }
            });
        }

        #[cfg(unix)]
        if let Some(path) = &self.unixgram_socket_path {
            let listener =
                UnixgramListener::bind(path, sender.clone(), Arc::clone(&self.telemetry))
                    .map_err(|source| BuildError::FailedToBind { endpoint: "unixgram", source })?;
            tokio::spawn(async move {
                if let Err(error) = listener.listen().await {
                    error!(error = %error, "unixgram listener terminated");
                }
            });
        }

        let http = tokio::net::TcpListener::bind(self.http_listen_address)
            .await
            .map_err(|source| BuildError::FailedToBind { endpoint: "http", source })?;
        tokio::spawn(scrape::serve(http, self.handle.clone()));

        // The listeners hold the only remaining senders; when the last one
        // stops, the channel closes and the exporter returns.
        drop(sender);

        let exporter = Exporter::new(self.mapper, self.registry, self.telemetry);
        exporter.run(rx).await;
        Ok(())
    }
}
