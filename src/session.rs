use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::debug;
use mio::net::TcpStream;
use mio::{Interest, Token};

use crate::error::{EngineError, Result};
use crate::processor::{MessageProcessor, Protocol};
use crate::write_queue::WriteQueue;

/// Per-connection lifecycle.
///
/// `Enabled` is the normal read/write state. `Closing` accepts no further
/// application writes but still drains the queued ones. `Closed` is terminal:
/// the transport handle and buffers are released exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Enabled,
    Closing,
    Closed,
}

/// Per-connection state, owned and mutated by the reactor thread only.
///
/// A session holds exactly one transport handle and exactly one processor
/// binding; both are fixed at accept time. Processors interact with it
/// through [`send`](Session::send), [`close`](Session::close) and
/// [`status`](Session::status) during their synchronous callbacks.
pub struct Session {
    token: Token,
    stream: TcpStream,
    peer_addr: SocketAddr,
    status: SessionStatus,
    processor: Arc<dyn MessageProcessor>,
    protocol: Box<dyn Protocol>,
    /// Fixed-size buffer one non-blocking read lands in, reused every cycle.
    scratch: Box<[u8]>,
    /// Accumulated inbound bytes awaiting a complete message.
    read_buf: BytesMut,
    /// Cap on `read_buf` growth while the protocol withholds a message.
    max_message_size: Option<usize>,
    write_queue: WriteQueue,
    registered: Interest,
}

impl Session {
    pub(crate) fn new(
        token: Token,
        stream: TcpStream,
        peer_addr: SocketAddr,
        processor: Arc<dyn MessageProcessor>,
        protocol: Box<dyn Protocol>,
        read_buffer_size: usize,
        max_message_size: Option<usize>,
    ) -> Self {
        Session {
            token,
            stream,
            peer_addr,
            status: SessionStatus::Enabled,
            processor,
            protocol,
            scratch: vec![0u8; read_buffer_size].into_boxed_slice(),
            read_buf: BytesMut::new(),
            max_message_size,
            write_queue: WriteQueue::new(),
            registered: Interest::READABLE,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Outbound bytes not yet accepted by the transport.
    pub fn queued_bytes(&self) -> usize {
        self.write_queue.queued_bytes()
    }

    /// Enqueues an outbound chunk. Write interest is registered on the next
    /// settle pass; the reactor drains the queue as the transport accepts it.
    pub fn send(&mut self, data: impl Into<Bytes>) -> Result<()> {
        if self.status != SessionStatus::Enabled {
            return Err(EngineError::SessionNotWritable(self.status));
        }
        self.write_queue.push(data.into());
        Ok(())
    }

    /// Moves the session toward teardown. Queued writes still drain; the
    /// transport is released once the queue is empty.
    pub fn close(&mut self) {
        if self.status == SessionStatus::Enabled {
            self.status = SessionStatus::Closing;
        }
    }

    pub(crate) fn processor(&self) -> Arc<dyn MessageProcessor> {
        Arc::clone(&self.processor)
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn mark_closed(&mut self) {
        self.status = SessionStatus::Closed;
    }

    /// True once nothing can unblock further progress: queued writes are
    /// drained and the session is past `Enabled`.
    pub(crate) fn ready_to_close(&self) -> bool {
        match self.status {
            SessionStatus::Enabled => false,
            SessionStatus::Closing => self.write_queue.is_empty(),
            SessionStatus::Closed => true,
        }
    }

    /// Readiness interest matching the session's current state.
    pub(crate) fn desired_interest(&self) -> Interest {
        match self.status {
            SessionStatus::Enabled => {
                if self.write_queue.is_empty() {
                    Interest::READABLE
                } else {
                    Interest::READABLE.add(Interest::WRITABLE)
                }
            }
            // no more reads once past Enabled; only the drain remains
            _ => Interest::WRITABLE,
        }
    }

    pub(crate) fn registered_interest(&self) -> Interest {
        self.registered
    }

    pub(crate) fn set_registered_interest(&mut self, interest: Interest) {
        self.registered = interest;
    }

    /// Read-ready handler: alternates a decode/flush step with one
    /// non-blocking read until the fairness budget is spent, the session
    /// leaves `Enabled` mid-loop, or the read makes no further progress.
    ///
    /// End-of-stream moves the session to `Closing`: read interest is
    /// dropped but the connection is not forcibly closed, since queued
    /// writes may still need to drain.
    ///
    /// Returns true when the budget ran out with the transport possibly
    /// still holding data. The multiplexer is edge-triggered, so the
    /// reactor must re-dispatch such sessions itself instead of waiting for
    /// a readiness event that will never fire.
    pub(crate) fn read_cycle(&mut self, limit: usize) -> Result<bool> {
        let mut remaining = limit;
        loop {
            self.flush_read_buffer()?;
            self.check_accumulation()?;
            if self.status != SessionStatus::Enabled {
                return Ok(false);
            }
            if remaining == 0 {
                return Ok(true);
            }
            remaining -= 1;
            match self.read_once() {
                Ok(0) => {
                    debug!("peer {} reached end of stream", self.peer_addr);
                    self.close();
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write-ready handler: dequeues pending chunks while the transport
    /// accepts bytes and the fairness budget lasts. A zero-byte write means
    /// the destination is not currently writable; the queue is left intact.
    ///
    /// Returns true when the budget ran out while the transport was still
    /// accepting bytes (same re-dispatch contract as [`read_cycle`]).
    ///
    /// [`read_cycle`]: Session::read_cycle
    pub(crate) fn write_cycle(&mut self, limit: usize) -> Result<bool> {
        let mut remaining = limit;
        while !self.write_queue.is_empty() {
            if remaining == 0 {
                return Ok(true);
            }
            match self.write_once() {
                Ok(0) => break,
                Ok(_) => remaining -= 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    /// Hands buffered bytes to the protocol and runs the processor once per
    /// complete message, all on the reactor thread.
    fn flush_read_buffer(&mut self) -> Result<()> {
        while self.status == SessionStatus::Enabled {
            match self.protocol.decode(&mut self.read_buf)? {
                Some(msg) => {
                    let processor = Arc::clone(&self.processor);
                    processor.process(self, msg)?;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Enforced after every decode flush, so only bytes the protocol could
    /// not consume count against the cap.
    fn check_accumulation(&self) -> Result<()> {
        if let Some(limit) = self.max_message_size {
            if self.read_buf.len() > limit {
                return Err(EngineError::MessageTooLarge {
                    limit,
                    buffered: self.read_buf.len(),
                });
            }
        }
        Ok(())
    }

    fn read_once(&mut self) -> io::Result<usize> {
        let n = self.stream.read(&mut self.scratch)?;
        if n > 0 {
            self.read_buf.extend_from_slice(&self.scratch[..n]);
        }
        Ok(n)
    }

    fn write_once(&mut self) -> io::Result<usize> {
        let Some(chunk) = self.write_queue.current() else {
            return Ok(0);
        };
        let n = self.stream.write(chunk)?;
        self.write_queue.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Passthrough;
    use std::io::{Read as _, Write as _};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct NullProcessor;

    impl MessageProcessor for NullProcessor {
        fn process(&self, _session: &mut Session, _msg: Bytes) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingProcessor {
        seen: Arc<Mutex<Vec<Bytes>>>,
    }

    impl MessageProcessor for RecordingProcessor {
        fn process(&self, _session: &mut Session, msg: Bytes) -> Result<()> {
            self.seen.lock().unwrap().push(msg);
            Ok(())
        }
    }

    /// Builds a session over a real loopback pair; returns the peer end.
    fn socket_session(processor: Arc<dyn MessageProcessor>) -> (Session, std::net::TcpStream) {
        socket_session_with(processor, Box::new(Passthrough), None)
    }

    fn socket_session_with(
        processor: Arc<dyn MessageProcessor>,
        protocol: Box<dyn Protocol>,
        max_message_size: Option<usize>,
    ) -> (Session, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, peer_addr) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(server);
        let session = Session::new(
            Token(2),
            stream,
            peer_addr,
            processor,
            protocol,
            8192,
            max_message_size,
        );
        (session, client)
    }

    #[test]
    fn send_registers_write_desire() {
        let (mut session, _client) = socket_session(Arc::new(NullProcessor));
        assert_eq!(session.desired_interest(), Interest::READABLE);

        session.send(Bytes::from_static(b"out")).unwrap();
        assert_eq!(
            session.desired_interest(),
            Interest::READABLE.add(Interest::WRITABLE)
        );
    }

    #[test]
    fn send_rejected_once_closing() {
        let (mut session, _client) = socket_session(Arc::new(NullProcessor));
        session.close();
        assert_eq!(session.status(), SessionStatus::Closing);

        let err = session.send(Bytes::from_static(b"late")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SessionNotWritable(SessionStatus::Closing)
        ));
    }

    #[test]
    fn closing_with_empty_queue_is_ready_to_close() {
        let (mut session, _client) = socket_session(Arc::new(NullProcessor));
        session.close();
        assert!(session.ready_to_close());
    }

    #[test]
    fn closing_with_pending_writes_drains_first() {
        let (mut session, _client) = socket_session(Arc::new(NullProcessor));
        session.send(Bytes::from_static(b"pending")).unwrap();
        session.close();

        assert!(!session.ready_to_close());
        assert_eq!(session.desired_interest(), Interest::WRITABLE);
    }

    #[test]
    fn eof_moves_session_to_closing() {
        let (mut session, client) = socket_session(Arc::new(NullProcessor));
        drop(client);

        let deadline = Instant::now() + Duration::from_secs(2);
        while session.status() == SessionStatus::Enabled {
            session.read_cycle(16).unwrap();
            assert!(Instant::now() < deadline, "EOF never observed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.status(), SessionStatus::Closing);
        assert!(session.ready_to_close());
    }

    #[test]
    fn read_budget_returns_control_with_data_left() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = Arc::new(RecordingProcessor { seen: seen.clone() });
        let (mut session, mut client) = socket_session(processor);

        client.write_all(&vec![0x5a; 20_000]).unwrap();

        // a budget of one read may consume at most one scratch buffer
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if session.read_cycle(1).unwrap() {
                break;
            }
            assert!(Instant::now() < deadline, "data never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }

        let delivered: usize = seen.lock().unwrap().iter().map(|m| m.len()).sum();
        assert!(delivered > 0);
        assert!(delivered <= 8192, "budget exceeded: {delivered} bytes");
    }

    /// Never yields a message, so accumulation only grows.
    struct Withholding;

    impl Protocol for Withholding {
        fn decode(&mut self, _buf: &mut BytesMut) -> Result<Option<Bytes>> {
            Ok(None)
        }
    }

    #[test]
    fn accumulation_past_the_cap_is_an_error() {
        let (mut session, mut client) =
            socket_session_with(Arc::new(NullProcessor), Box::new(Withholding), Some(16));

        client.write_all(&[0x42; 64]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let err = loop {
            match session.read_cycle(16) {
                Ok(_) => {
                    assert!(Instant::now() < deadline, "cap never enforced");
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => break e,
            }
        };
        assert!(matches!(
            err,
            EngineError::MessageTooLarge { limit: 16, buffered } if buffered > 16
        ));
    }

    #[test]
    fn cap_ignores_bytes_the_protocol_consumed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = Arc::new(RecordingProcessor { seen: seen.clone() });
        let (mut session, mut client) =
            socket_session_with(processor, Box::new(Passthrough), Some(16));

        // far more than the cap in total, but Passthrough drains every flush
        client.write_all(&[0x42; 64]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().iter().map(|m: &Bytes| m.len()).sum::<usize>() < 64 {
            session.read_cycle(16).unwrap();
            assert!(Instant::now() < deadline, "data never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn flush_delivers_buffered_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = Arc::new(RecordingProcessor { seen: seen.clone() });
        let (mut session, _client) = socket_session(processor);

        session.read_buf.extend_from_slice(b"payload");
        session.flush_read_buffer().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0][..], b"payload");
    }

    #[test]
    fn write_cycle_reaches_the_peer() {
        let (mut session, mut client) = socket_session(Arc::new(NullProcessor));
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        session.send(Bytes::from_static(b"hello peer")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.queued_bytes() > 0 {
            session.write_cycle(16).unwrap();
            assert!(Instant::now() < deadline, "write never drained");
        }

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello peer");
    }
}
