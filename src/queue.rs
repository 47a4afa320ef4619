//! The grow-only byte queue backing per-socket read/write buffers.
//!
//! Invariant: `0 <= index <= length <= buffer.len()` always holds. A full
//! drain (index reaches length) releases the backing storage and resets
//! both counters to zero, matching the base spec's byte-queue data model.

/// A grow-only buffer with a consumed-prefix index, used for both the
/// write queue (outbound bytes the OS would not yet accept) and the read
/// queue (inbound bytes accumulated for framed-message reassembly).
#[derive(Debug, Default)]
pub struct ByteQueue {
    buffer: Vec<u8>,
    /// Bytes already consumed from the front.
    index: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        ByteQueue { buffer: Vec::new(), index: 0 }
    }

    /// Total buffered bytes, including the already-consumed prefix.
    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes already consumed from the front of the queue.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bytes remaining to be consumed.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.index
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unconsumed tail of the buffer.
    pub fn unread(&self) -> &[u8] {
        &self.buffer[self.index..]
    }

    /// Appends bytes to the tail of the queue.
    ///
    /// On a queue that was previously fully drained this is exactly the
    /// "allocate exactly the needed bytes" path in §4.5.4; on a queue with
    /// residue, `compact` should usually be called first by the caller that
    /// owns write-queue growth policy (the write path does this itself).
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Compacts the buffer by shifting the unconsumed tail to offset zero,
    /// discarding the already-consumed prefix. This is the write-queue
    /// compaction policy in §4.5.4: sound, but it does not preserve the
    /// original capacity curve (a ring buffer would, per the base spec's
    /// open design note).
    pub fn compact(&mut self) {
        if self.index == 0 {
            return;
        }
        self.buffer.drain(0..self.index);
        self.index = 0;
    }

    /// Marks `n` bytes as consumed from the front. Once the queue is fully
    /// drained the backing storage is released and both counters reset to
    /// zero, per the byte-queue invariant.
    pub fn consume(&mut self, n: usize) {
        self.index = (self.index + n).min(self.buffer.len());
        if self.index == self.buffer.len() {
            self.reset();
        }
    }

    /// Releases the backing buffer and resets length/index to zero.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.buffer.shrink_to_fit();
        self.index = 0;
    }

    /// Reserves capacity for at least `capacity` total bytes, without
    /// changing `length()` — this is a pure allocation hint (used by
    /// `ReadMsg` once a header declares a payload length larger than what's
    /// buffered so far, to avoid repeated small reallocations as more bytes
    /// arrive). Grow-only: never truncates already-buffered bytes, since a
    /// `fill()` can legitimately hand over more than one frame's worth of
    /// data in a single call.
    pub fn reserve_total(&mut self, capacity: usize) {
        if capacity > self.buffer.len() {
            self.buffer.reserve(capacity - self.buffer.len());
        }
    }

    /// Direct mutable access to the full backing buffer, used by the
    /// message-protocol reader to fill bytes in place at their final
    /// wire-offset position.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_holds_after_push_and_consume() {
        let mut q = ByteQueue::new();
        q.push(b"hello world");
        assert!(q.index() <= q.length());
        q.consume(5);
        assert_eq!(q.unread(), b" world");
        assert!(q.index() <= q.length());
    }

    #[test]
    fn full_drain_resets_to_zero() {
        let mut q = ByteQueue::new();
        q.push(b"abc");
        q.consume(3);
        assert_eq!(q.length(), 0);
        assert_eq!(q.index(), 0);
    }

    #[test]
    fn compact_shifts_tail_to_zero() {
        let mut q = ByteQueue::new();
        q.push(b"abcdef");
        q.consume(2);
        q.compact();
        assert_eq!(q.index(), 0);
        assert_eq!(q.unread(), b"cdef");
    }
}
