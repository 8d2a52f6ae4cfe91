use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::processor::MessageProcessor;

/// Optional collaborator that receives traffic forwarded to a cluster peer.
///
/// The engine treats forwarding internals as entirely external: it only
/// drives the forwarder's lifecycle and, when the configured
/// [`ClusterTrigger`] fires for a new connection, binds that session to the
/// forwarder's processor instead of the default one.
///
/// The forwarder is injected through [`ServerConfig`] and owned by whoever
/// constructed it; sharing one forwarder across several engines is the
/// caller's decision, made explicit by passing the same `Arc` to each.
pub trait ClusterForwarder: Send + Sync {
    /// Called during engine start, after the reactor thread is running.
    /// Failure is logged and is not fatal to startup; the engine keeps
    /// serving non-cluster traffic. The optional
    /// [`cluster_url`](ServerConfig::cluster_url) is available here.
    fn init(&self, config: &ServerConfig) -> Result<()>;

    /// The processor cluster-bound sessions are attached to.
    fn processor(&self) -> Arc<dyn MessageProcessor>;

    /// Called once during engine shutdown; failures are logged, never
    /// rethrown.
    fn shutdown(&self) -> Result<()>;
}

/// Per-connection routing decision, evaluated once at accept time.
///
/// When it returns true the session is bound to the forwarder's processor
/// for its whole lifetime; the binding never changes afterwards.
pub trait ClusterTrigger: Send + Sync {
    fn should_forward(&self, peer: SocketAddr) -> bool;
}
