//! # Sluice
//! A reactor-pattern network engine: a single-threaded, selector-driven event
//! loop that multiplexes many concurrent TCP connections on top of [`mio`],
//! decodes application messages through a pluggable processor, and manages
//! per-connection buffering, backpressure and lifecycle.
//!
//! ## Core Philosophy
//! Sluice was designed for services that require:
//! - **Single-threaded dispatch**: one dedicated thread per engine drives the
//!   multiplexer and every per-connection handler, so session state needs no
//!   locks
//! - **Cooperative fairness**: loop-count bounds cap how much I/O one
//!   saturated connection may consume per pass, instead of preemption
//! - **Failure containment**: an error while dispatching one connection
//!   closes that connection only; the loop and all other connections are
//!   unaffected
//! - **Transport-agnostic framing**: no wire format is mandated; byte layout
//!   belongs to the injected [`Protocol`] and [`MessageProcessor`]
//!
//! ## Architecture Overview
//! ```text
//! ┌────────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ ChannelService │────▶│   Reactor    │────▶│  PollHandle  │
//! │ (start/stop)   │     │ (one thread) │     │ (mio + wake) │
//! └────────────────┘     └──────┬───────┘     └──────────────┘
//!                               │ ready events
//!                ┌──────────────┼──────────────┐
//!                ▼              ▼              ▼
//!          ┌──────────┐   ┌──────────┐   ┌──────────┐
//!          │ Acceptor │   │ Session  │   │ Session  │ ...
//!          └──────────┘   │ rd / wr  │   │ rd / wr  │
//!                         └────┬─────┘   └──────────┘
//!                              ▼ decoded messages
//!                      ┌──────────────────┐
//!                      │ MessageProcessor │
//!                      └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use sluice::{ChannelService, MessageProcessor, Result, ServerConfig, Session};
//!
//! struct Echo;
//!
//! impl MessageProcessor for Echo {
//!     fn process(&self, session: &mut Session, msg: Bytes) -> Result<()> {
//!         session.send(msg)
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let config = ServerConfig::builder(Arc::new(Echo))
//!         .address("127.0.0.1:8080".parse().unwrap())
//!         .build();
//!
//!     let service = ChannelService::new(config);
//!     service.start()?;
//!     service.join();
//!     Ok(())
//! }
//! ```
//!
//! Processor callbacks run synchronously on the reactor thread: a processor
//! that blocks stalls the whole engine. That contract is what keeps session
//! buffers single-writer and lock-free; for parallel dispatch, shard
//! connections across several independent engine instances.
//!
//! - [`ChannelService`]: engine handle (start, shutdown, join)
//! - [`ServerConfig`]: immutable configuration with builder
//! - [`Session`]: per-connection state exposed to processors
//! - [`MessageProcessor`] / [`Protocol`]: the pluggable application seam
//! - [`ClusterForwarder`] / [`ClusterTrigger`]: optional per-connection
//!   routing to an injected forwarding collaborator

pub mod acceptor;
pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod poll;
pub mod processor;
pub mod service;
pub mod session;
pub mod write_queue;

pub use cluster::{ClusterForwarder, ClusterTrigger};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{EngineError, Result};
pub use processor::{MessageProcessor, Passthrough, Protocol};
pub use service::{ChannelService, ServiceStatus};
pub use session::{Session, SessionStatus};

/// Re-exports of the commonly used surface.
///
/// ```rust
/// use sluice::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cluster::{ClusterForwarder, ClusterTrigger};
    pub use crate::config::{ServerConfig, ServerConfigBuilder};
    pub use crate::error::{EngineError, Result};
    pub use crate::processor::{MessageProcessor, Passthrough, Protocol};
    pub use crate::service::{ChannelService, ServiceStatus};
    pub use crate::session::{Session, SessionStatus};
}
