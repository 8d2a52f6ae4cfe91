use std::collections::VecDeque;

use bytes::Bytes;

/// FIFO queue of outbound byte chunks with partial-write resume.
///
/// Chunks are drained strictly in enqueue order. `head_pos` tracks how far
/// into the front chunk the transport has already accepted bytes, so a
/// partial write never re-sends bytes and never loses the remainder.
#[derive(Default)]
pub struct WriteQueue {
    chunks: VecDeque<Bytes>,
    head_pos: usize,
    queued_bytes: usize,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.queued_bytes += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// The unsent remainder of the front chunk, if any.
    pub fn current(&self) -> Option<&[u8]> {
        self.chunks.front().map(|c| &c[self.head_pos..])
    }

    /// Records `n` bytes of the front chunk as accepted by the transport.
    pub fn advance(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let front_len = self.chunks.front().map(Bytes::len).unwrap_or(0);
        debug_assert!(self.head_pos + n <= front_len);
        self.head_pos += n;
        self.queued_bytes -= n;
        if self.head_pos >= front_len {
            self.chunks.pop_front();
            self.head_pos = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes not yet accepted by the transport.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}
