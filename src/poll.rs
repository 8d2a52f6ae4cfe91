use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};

/// Token reserved for the shutdown waker.
pub const WAKE_TOKEN: Token = Token(0);

/// Thin wrapper around the mio [`Poll`] plus a [`Waker`] so a blocked
/// `poll()` can be interrupted from another thread.
///
/// The waker is the only way shutdown can reach a reactor that is parked in
/// the blocking wait with no timeout.
pub struct PollHandle {
    poller: Poll,
    waker: Arc<Waker>,
}

impl PollHandle {
    pub fn new() -> io::Result<Self> {
        let poller = Poll::new()?;
        let waker = Arc::new(Waker::new(poller.registry(), WAKE_TOKEN)?);
        Ok(PollHandle { poller, waker })
    }

    pub fn register<S>(&self, src: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        src.register(self.poller.registry(), token, interest)
    }

    pub fn reregister<S>(&self, src: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        src.reregister(self.poller.registry(), token, interest)
    }

    pub fn deregister<S>(&self, src: &mut S) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        src.deregister(self.poller.registry())
    }

    /// Blocks until at least one registered source is ready or the waker
    /// fires.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.poller.poll(events, timeout)
    }

    /// Handle for waking the blocked poll from another thread.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }
}
