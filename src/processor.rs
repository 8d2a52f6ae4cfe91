use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::session::Session;

/// Application-logic capability consumed by the engine.
///
/// A processor is bound to a session exactly once, at accept time, and every
/// callback runs synchronously on the reactor thread. A processor that blocks
/// stalls the whole engine; that is a contractual obligation on the
/// implementation, not something the engine can enforce.
///
/// Errors returned from [`process`](MessageProcessor::process) terminate only
/// the offending connection; the reactor loop and every other connection keep
/// running.
pub trait MessageProcessor: Send + Sync {
    /// Called once, right after the session is constructed and bound.
    /// Side-effect-only; typically captures the session identity for later
    /// correlation.
    fn init_session(&self, session: &mut Session) {
        let _ = session;
    }

    /// Called once per fully decoded application message.
    fn process(&self, session: &mut Session, msg: Bytes) -> Result<()>;

    /// Called once during engine shutdown. Failures are logged by the
    /// engine, never rethrown.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Wire-format capability: turns accumulated inbound bytes into messages.
///
/// The engine mandates no byte layout. A fresh decoder is created per session
/// (see [`ServerConfig::protocol`](crate::config::ServerConfigBuilder::protocol)),
/// so implementations may keep per-connection parse state. `decode` is called
/// repeatedly until it reports `None`; consumed bytes must be removed from
/// `buf`, unconsumed bytes are retained and grow as further reads arrive.
///
/// A decoder that withholds a message indefinitely lets `buf` grow with
/// every read. Protocols whose frames carry untrusted length fields should
/// reject absurd claims in `decode`, or the service should set
/// [`max_message_size`](crate::config::ServerConfigBuilder::max_message_size)
/// so the engine closes such connections.
pub trait Protocol: Send {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>>;
}

/// Default protocol: every non-empty read buffer flushes as one message.
pub struct Passthrough;

impl Protocol for Passthrough {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buf.split().freeze()))
        }
    }
}
