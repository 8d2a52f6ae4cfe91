use std::net::SocketAddr;
use std::sync::Arc;

use crate::cluster::{ClusterForwarder, ClusterTrigger};
use crate::processor::{MessageProcessor, Passthrough, Protocol};

/// Creates one decoder per accepted session.
pub type ProtocolFactory = Arc<dyn Fn() -> Box<dyn Protocol> + Send + Sync>;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;
/// Iterations one connection may consume per dispatch pass before control
/// returns to the multiplexer. Finite and positive by construction.
pub const DEFAULT_READ_LOOP_LIMIT: usize = 16;
pub const DEFAULT_WRITE_LOOP_LIMIT: usize = 16;

/// Engine configuration, immutable after `start()`.
///
/// The acceptor consults this per incoming connection to decide which
/// processor a session is bound to: when both a cluster trigger and a
/// forwarder are configured and the trigger fires for the connection, the
/// session goes to the forwarder's processor; otherwise to `processor`.
///
/// ## Fairness bounds
///
/// `read_loop_limit` / `write_loop_limit` cap how many I/O iterations a
/// single connection may consume per pass through the reactor loop, so one
/// saturated peer cannot starve the others registered on the same thread.
/// They bound monopolization only; they do not guarantee round-robin order.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub address: SocketAddr,
    /// Processor sessions are bound to by default
    pub processor: Arc<dyn MessageProcessor>,
    /// Decoder factory, invoked once per session
    pub protocol: ProtocolFactory,
    /// Optional cluster forwarder, initialised at start
    pub cluster: Option<Arc<dyn ClusterForwarder>>,
    /// Optional per-connection routing predicate
    pub cluster_trigger: Option<Arc<dyn ClusterTrigger>>,
    /// Optional cluster endpoint, carried for the forwarder's use
    pub cluster_url: Option<String>,
    /// Max read iterations per connection per dispatch pass
    pub read_loop_limit: usize,
    /// Max write iterations per connection per dispatch pass
    pub write_loop_limit: usize,
    /// Size of the reused per-session read buffer
    pub read_buffer_size: usize,
    /// Cap on inbound accumulation while the protocol withholds a complete
    /// message; a connection exceeding it is closed. `None` leaves the cap
    /// to the protocol.
    pub max_message_size: Option<usize>,
    /// Enable TCP_NODELAY on accepted connections
    pub no_delay: bool,
}

impl ServerConfig {
    /// Create a new builder; the processor is the only required option.
    pub fn builder(processor: Arc<dyn MessageProcessor>) -> ServerConfigBuilder {
        ServerConfigBuilder::new(processor)
    }
}

/// Builder for [`ServerConfig`]. Unset options fall back to defaults;
/// fairness bounds are clamped to at least one iteration.
pub struct ServerConfigBuilder {
    address: Option<SocketAddr>,
    processor: Arc<dyn MessageProcessor>,
    protocol: Option<ProtocolFactory>,
    cluster: Option<Arc<dyn ClusterForwarder>>,
    cluster_trigger: Option<Arc<dyn ClusterTrigger>>,
    cluster_url: Option<String>,
    read_loop_limit: Option<usize>,
    write_loop_limit: Option<usize>,
    read_buffer_size: Option<usize>,
    max_message_size: Option<usize>,
    no_delay: Option<bool>,
}

impl ServerConfigBuilder {
    pub fn new(processor: Arc<dyn MessageProcessor>) -> Self {
        Self {
            address: None,
            processor,
            protocol: None,
            cluster: None,
            cluster_trigger: None,
            cluster_url: None,
            read_loop_limit: None,
            write_loop_limit: None,
            read_buffer_size: None,
            max_message_size: None,
            no_delay: None,
        }
    }

    /// Set the address to bind to
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the decoder factory (defaults to [`Passthrough`])
    pub fn protocol(mut self, factory: ProtocolFactory) -> Self {
        self.protocol = Some(factory);
        self
    }

    /// Inject a cluster forwarder
    pub fn cluster(mut self, forwarder: Arc<dyn ClusterForwarder>) -> Self {
        self.cluster = Some(forwarder);
        self
    }

    /// Set the per-connection cluster routing predicate
    pub fn cluster_trigger(mut self, trigger: Arc<dyn ClusterTrigger>) -> Self {
        self.cluster_trigger = Some(trigger);
        self
    }

    /// Set the cluster endpoint URL
    pub fn cluster_url(mut self, url: impl Into<String>) -> Self {
        self.cluster_url = Some(url.into());
        self
    }

    /// Set the read fairness bound (clamped to >= 1)
    pub fn read_loop_limit(mut self, limit: usize) -> Self {
        self.read_loop_limit = Some(limit);
        self
    }

    /// Set the write fairness bound (clamped to >= 1)
    pub fn write_loop_limit(mut self, limit: usize) -> Self {
        self.write_loop_limit = Some(limit);
        self
    }

    /// Set the per-session read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = Some(size);
        self
    }

    /// Cap inbound accumulation per connection
    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = Some(limit);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    /// Build the ServerConfig
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            address: self
                .address
                .unwrap_or_else(|| "127.0.0.1:8080".parse().unwrap()),
            processor: self.processor,
            protocol: self
                .protocol
                .unwrap_or_else(|| Arc::new(|| Box::new(Passthrough))),
            cluster: self.cluster,
            cluster_trigger: self.cluster_trigger,
            cluster_url: self.cluster_url,
            read_loop_limit: self.read_loop_limit.unwrap_or(DEFAULT_READ_LOOP_LIMIT).max(1),
            write_loop_limit: self
                .write_loop_limit
                .unwrap_or(DEFAULT_WRITE_LOOP_LIMIT)
                .max(1),
            read_buffer_size: self.read_buffer_size.unwrap_or(DEFAULT_READ_BUFFER_SIZE),
            max_message_size: self.max_message_size,
            no_delay: self.no_delay.unwrap_or(true),
        }
    }
}
