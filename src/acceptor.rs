use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::poll::PollHandle;
use crate::processor::MessageProcessor;
use crate::session::Session;

/// Sessions are numbered from here; below are the waker and listener tokens.
const FIRST_SESSION_TOKEN: usize = 2;

/// Accepts inbound connections and turns each into a registered [`Session`].
///
/// The processor binding is decided here, once per connection, and is
/// immutable for the session's lifetime.
pub(crate) struct Acceptor {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    next_token: usize,
}

impl Acceptor {
    pub(crate) fn new(listener: TcpListener, config: Arc<ServerConfig>) -> Self {
        Acceptor {
            listener,
            config,
            next_token: FIRST_SESSION_TOKEN,
        }
    }

    pub(crate) fn listener_mut(&mut self) -> &mut TcpListener {
        &mut self.listener
    }

    /// Drains every pending accept. A failure while admitting one connection
    /// drops that connection only; the accept loop and all other sessions
    /// continue.
    pub(crate) fn accept_ready(
        &mut self,
        poll: &PollHandle,
        sessions: &mut HashMap<Token, Session>,
    ) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if let Err(e) = self.admit(stream, peer_addr, poll, sessions) {
                        warn!("dropping inbound connection from {peer_addr}: {e}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn admit(
        &mut self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        poll: &PollHandle,
        sessions: &mut HashMap<Token, Session>,
    ) -> Result<()> {
        if let Err(e) = stream.set_nodelay(self.config.no_delay) {
            debug!("failed to set TCP_NODELAY for {peer_addr}: {e}");
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        poll.register(&mut stream, token, Interest::READABLE)?;

        let processor = self.bind_processor(peer_addr);
        let mut session = Session::new(
            token,
            stream,
            peer_addr,
            processor,
            (self.config.protocol)(),
            self.config.read_buffer_size,
            self.config.max_message_size,
        );
        let bound = session.processor();
        bound.init_session(&mut session);

        // init_session may already have queued outbound data
        let desired = session.desired_interest();
        if desired != session.registered_interest() {
            poll.reregister(session.stream_mut(), token, desired)?;
            session.set_registered_interest(desired);
        }

        info!("accepted connection from {peer_addr} ({token:?})");
        sessions.insert(token, session);
        Ok(())
    }

    /// Binding decision: cluster trigger fires and a forwarder is injected,
    /// the session belongs to the forwarder; otherwise to the default
    /// processor.
    fn bind_processor(&self, peer_addr: SocketAddr) -> Arc<dyn MessageProcessor> {
        if let (Some(trigger), Some(forwarder)) =
            (&self.config.cluster_trigger, &self.config.cluster)
        {
            if trigger.should_forward(peer_addr) {
                debug!("binding {peer_addr} to the cluster forwarder");
                return forwarder.processor();
            }
        }
        Arc::clone(&self.config.processor)
    }
}
