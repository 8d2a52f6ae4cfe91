use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Token, Waker};

use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::error::{EngineError, Result};
use crate::event::Readiness;
use crate::poll::{PollHandle, WAKE_TOKEN};
use crate::session::Session;

pub(crate) const LISTENER: Token = Token(1);
const EVENTS_CAPACITY: usize = 1024;

/// Engine-wide lifecycle. Transitions are monotonic forward except for the
/// restart edge `Stopped → Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceStatus {
    Initial = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl ServiceStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceStatus::Initial,
            1 => ServiceStatus::Starting,
            2 => ServiceStatus::Running,
            3 => ServiceStatus::Stopping,
            _ => ServiceStatus::Stopped,
        }
    }
}

/// Lock-free holder for the engine status, shared between the caller-facing
/// handle and the reactor thread.
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        StatusCell(AtomicU8::new(ServiceStatus::Initial as u8))
    }

    pub(crate) fn load(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, status: ServiceStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }

    /// `Initial`/`Stopped` → `Starting`; anything else reports the status
    /// that blocked the start.
    fn begin_start(&self) -> std::result::Result<(), ServiceStatus> {
        for from in [ServiceStatus::Initial, ServiceStatus::Stopped] {
            if self
                .0
                .compare_exchange(
                    from as u8,
                    ServiceStatus::Starting as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(self.load())
    }

    /// `Starting → Running`. Fails when a concurrent `shutdown()` claimed
    /// the lifecycle in between; the shutdown then owns teardown and the
    /// starter must back out without spawning.
    fn confirm_running(&self) -> bool {
        self.0
            .compare_exchange(
                ServiceStatus::Starting as u8,
                ServiceStatus::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Moves to `Stopping` unless teardown already ran; returns whether this
    /// call owns the shutdown sequence.
    fn begin_stop(&self) -> bool {
        loop {
            let current = self.0.load(Ordering::SeqCst);
            if current == ServiceStatus::Stopping as u8 || current == ServiceStatus::Stopped as u8 {
                return false;
            }
            if self
                .0
                .compare_exchange(
                    current,
                    ServiceStatus::Stopping as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// The reactor engine: one dedicated thread multiplexing every connection of
/// this instance.
///
/// `start()` binds the listening address, spawns the reactor thread and
/// returns; `shutdown()` stops it cooperatively. All per-connection work
/// (accepting, decoding, processor callbacks, writes) happens on the reactor
/// thread, which is what makes session state lock-free.
///
/// ```no_run
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use sluice::{ChannelService, MessageProcessor, Result, ServerConfig, Session};
///
/// struct Printer;
///
/// impl MessageProcessor for Printer {
///     fn process(&self, session: &mut Session, msg: Bytes) -> Result<()> {
///         println!("{} sent {} bytes", session.peer_addr(), msg.len());
///         Ok(())
///     }
/// }
///
/// fn main() -> Result<()> {
///     let config = ServerConfig::builder(Arc::new(Printer))
///         .address("127.0.0.1:8080".parse().unwrap())
///         .build();
///     let service = ChannelService::new(config);
///     service.start()?;
///     service.join();
///     Ok(())
/// }
/// ```
pub struct ChannelService {
    config: Arc<ServerConfig>,
    status: Arc<StatusCell>,
    waker: Mutex<Option<Arc<Waker>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ChannelService {
    pub fn new(config: ServerConfig) -> Self {
        ChannelService {
            config: Arc::new(config),
            status: Arc::new(StatusCell::new()),
            waker: Mutex::new(None),
            thread: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.load()
    }

    /// The bound listening address, once running. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Binds the configured address and spawns the reactor thread.
    ///
    /// Fails with [`EngineError::AlreadyStarted`] (and performs no side
    /// effects) unless the service is `Initial` or `Stopped`. A bind or
    /// registration failure rolls partially acquired resources back through
    /// the shutdown path before propagating. Cluster-forwarder init failure
    /// is logged and never aborts startup.
    ///
    /// A `shutdown()` racing this call wins the lifecycle: the start backs
    /// out without spawning and the service stays stopped.
    pub fn start(&self) -> Result<()> {
        self.status
            .begin_start()
            .map_err(EngineError::AlreadyStarted)?;
        match self.try_start() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shutdown();
                Err(e)
            }
        }
    }

    fn try_start(&self) -> Result<()> {
        let mut listener =
            TcpListener::bind(self.config.address).map_err(|source| EngineError::Bind {
                addr: self.config.address,
                source,
            })?;
        let mut poll = PollHandle::new()?;
        poll.register(&mut listener, LISTENER, Interest::READABLE)?;

        let bound = listener.local_addr().ok();
        *self.local_addr.lock().unwrap() = bound;
        *self.waker.lock().unwrap() = Some(poll.waker());
        if let Some(addr) = bound {
            info!("channel service listening on {addr}");
        }

        if !self.status.confirm_running() {
            // a concurrent shutdown won the lifecycle between begin_start
            // and here; it owns teardown, so nothing may spawn
            *self.waker.lock().unwrap() = None;
            *self.local_addr.lock().unwrap() = None;
            info!("start abandoned: shutdown raced ahead");
            return Ok(());
        }
        let reactor = Reactor {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            acceptor: Acceptor::new(listener, Arc::clone(&self.config)),
            sessions: HashMap::new(),
            pending: HashMap::new(),
            config: Arc::clone(&self.config),
            status: Arc::clone(&self.status),
        };
        let handle = Builder::new()
            .name("channel-service".into())
            .spawn(move || reactor.run())?;
        *self.thread.lock().unwrap() = Some(handle);

        if let Some(forwarder) = &self.config.cluster {
            match forwarder.init(&self.config) {
                Ok(()) => info!("cluster forwarder initialised"),
                Err(e) => {
                    warn!("cluster forwarder init failed: {e}; continuing without forwarding")
                }
            }
        }
        Ok(())
    }

    /// Cooperative, idempotent shutdown.
    ///
    /// Four release steps run independently of each other's success, each
    /// only logged on failure: processor shutdown, multiplexer wake (the
    /// blocking wait would otherwise never observe the stop), listener and
    /// session teardown on the reactor thread, cluster-forwarder shutdown.
    pub fn shutdown(&self) {
        if !self.status.begin_stop() {
            return;
        }
        info!("shutting down channel service");

        if let Err(e) = self.config.processor.shutdown() {
            warn!("processor shutdown failed: {e}");
        }

        let waker = self.waker.lock().unwrap().take();
        if let Some(waker) = waker {
            if let Err(e) = waker.wake() {
                warn!("failed to wake the multiplexer: {e}");
            }
        }

        let thread = self.thread.lock().unwrap().take();
        match thread {
            Some(handle) => {
                if handle.join().is_err() {
                    warn!("reactor thread panicked during shutdown");
                    self.status.store(ServiceStatus::Stopped);
                }
            }
            // never spawned (startup rollback); nothing to drain
            None => self.status.store(ServiceStatus::Stopped),
        }

        if let Some(forwarder) = &self.config.cluster {
            if let Err(e) = forwarder.shutdown() {
                warn!("cluster forwarder shutdown failed: {e}");
            }
        }
    }

    /// Blocks until the reactor thread exits (i.e. until some other thread
    /// calls [`shutdown`](Self::shutdown)).
    pub fn join(&self) {
        let thread = self.thread.lock().unwrap().take();
        if let Some(handle) = thread {
            let _ = handle.join();
        }
    }
}

impl Drop for ChannelService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reactor state, owned entirely by the dedicated thread.
///
/// The `Token → Session` map keeps session ownership explicit instead of
/// attaching state to the poll registration; every handler runs here, so no
/// session is ever touched by two threads.
///
/// `pending` holds sessions whose fairness budget ran out before the
/// transport was drained. The multiplexer is edge-triggered, so no further
/// readiness event would fire for them; the loop re-dispatches them itself
/// on the next pass, polling with a zero timeout so fresh events from other
/// connections still interleave.
struct Reactor {
    poll: PollHandle,
    events: Events,
    acceptor: Acceptor,
    sessions: HashMap<Token, Session>,
    pending: HashMap<Token, (bool, bool)>,
    config: Arc<ServerConfig>,
    status: Arc<StatusCell>,
}

enum Verdict {
    Close,
    Reregister(Interest),
    Nothing,
}

impl Reactor {
    fn run(mut self) {
        while self.status.load() == ServiceStatus::Running {
            let timeout = if self.pending.is_empty() {
                None
            } else {
                Some(Duration::ZERO)
            };
            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // transient: a systemic fault would recur immediately and
                // surface through per-connection failures instead
                warn!("multiplexer wait failed: {e}");
                continue;
            }
            let ready: Vec<Readiness> = self.events.iter().map(Readiness::capture).collect();
            for ev in ready {
                self.dispatch(ev);
            }
            let retry: Vec<(Token, (bool, bool))> = self.pending.drain().collect();
            for (token, (readable, writable)) in retry {
                self.dispatch(Readiness {
                    token,
                    readable,
                    writable,
                });
            }
        }
        self.teardown();
    }

    /// Routes one readiness event to exactly one of wake, accept or
    /// session I/O. Errors raised for a specific connection are contained
    /// here: that session is discarded, everything else keeps running.
    fn dispatch(&mut self, ev: Readiness) {
        let token = ev.token;
        if token == WAKE_TOKEN {
            return;
        }
        if token == LISTENER {
            self.acceptor.accept_ready(&self.poll, &mut self.sessions);
            return;
        }
        match self.drive_session(token, ev) {
            Err(e) => {
                warn!("closing {token:?} after dispatch error: {e}");
                self.close_session(token);
            }
            Ok((retry_read, retry_write)) => {
                self.settle_session(token);
                if (retry_read || retry_write) && self.sessions.contains_key(&token) {
                    let entry = self.pending.entry(token).or_insert((false, false));
                    entry.0 |= retry_read;
                    entry.1 |= retry_write;
                }
            }
        }
    }

    /// Returns which directions still have transport progress left after
    /// the fairness budgets ran out.
    fn drive_session(&mut self, token: Token, ev: Readiness) -> Result<(bool, bool)> {
        let read_limit = self.config.read_loop_limit;
        let write_limit = self.config.write_loop_limit;
        let Some(session) = self.sessions.get_mut(&token) else {
            // stale event for a connection discarded earlier in this pass
            debug!("no session for {token:?}");
            return Ok((false, false));
        };
        let mut retry_read = false;
        let mut retry_write = false;
        if ev.readable {
            retry_read = session.read_cycle(read_limit)?;
        }
        if ev.writable {
            retry_write = session.write_cycle(write_limit)?;
        }
        Ok((retry_read, retry_write))
    }

    /// After a dispatch: release sessions whose writes are logically
    /// complete, and realign poll interest with the session's state.
    fn settle_session(&mut self, token: Token) {
        let verdict = match self.sessions.get_mut(&token) {
            None => return,
            Some(session) => {
                if session.ready_to_close() {
                    Verdict::Close
                } else {
                    let desired = session.desired_interest();
                    if desired != session.registered_interest() {
                        Verdict::Reregister(desired)
                    } else {
                        Verdict::Nothing
                    }
                }
            }
        };
        match verdict {
            Verdict::Close => self.close_session(token),
            Verdict::Reregister(desired) => {
                let result = match self.sessions.get_mut(&token) {
                    Some(session) => {
                        let r = self.poll.reregister(session.stream_mut(), token, desired);
                        if r.is_ok() {
                            session.set_registered_interest(desired);
                        }
                        r
                    }
                    None => return,
                };
                if let Err(e) = result {
                    warn!("failed to update interest for {token:?}: {e}");
                    self.close_session(token);
                }
            }
            Verdict::Nothing => {}
        }
    }

    /// Releases one connection: registration cancelled, transport closed,
    /// buffers dropped. Runs at most once per session.
    fn close_session(&mut self, token: Token) {
        self.pending.remove(&token);
        if let Some(mut session) = self.sessions.remove(&token) {
            if let Err(e) = self.poll.deregister(session.stream_mut()) {
                debug!("deregister failed for {token:?}: {e}");
            }
            session.mark_closed();
            info!("closed connection {} ({token:?})", session.peer_addr());
        }
    }

    fn teardown(&mut self) {
        let tokens: Vec<Token> = self.sessions.keys().copied().collect();
        for token in tokens {
            self.close_session(token);
        }
        if let Err(e) = self.poll.deregister(self.acceptor.listener_mut()) {
            debug!("listener deregister failed: {e}");
        }
        self.status.store(ServiceStatus::Stopped);
        info!("channel service stopped");
    }
}
