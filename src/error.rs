use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::service::ServiceStatus;
use crate::session::SessionStatus;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine.
///
/// Callers only ever observe `AlreadyStarted`, `Bind` and `Io` from
/// [`ChannelService::start`](crate::ChannelService::start); everything raised
/// while dispatching a single connection is contained by the reactor and shows
/// up as that connection being closed, not as a returned error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start()` was called while the service was neither `Initial` nor
    /// `Stopped`.
    #[error("service already started (status: {0:?})")]
    AlreadyStarted(ServiceStatus),

    /// The listening address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `Session::send` on a session that no longer accepts writes.
    #[error("session is not accepting writes (status: {0:?})")]
    SessionNotWritable(SessionStatus),

    /// A `Protocol` rejected the inbound byte stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Inbound accumulation grew past the configured cap without the
    /// protocol producing a message; the connection is closed.
    #[error("inbound message exceeds {limit} bytes ({buffered} buffered)")]
    MessageTooLarge { limit: usize, buffered: usize },

    /// A `MessageProcessor` failed; the offending connection is closed.
    #[error("processor error: {0}")]
    Processor(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
