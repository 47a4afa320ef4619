//! The length-prefixed, CRC-checked framed message envelope.
//!
//! Wire layout: `magic(4) | length(4, BE) | payload(length) | 0x00 | tail(4) |
//! crc32(4, BE)`. The reader is stateful on a [`ByteQueue`] so that a single
//! stream can be parsed message-by-message across multiple non-blocking
//! reads; the writer always emits a complete envelope in one call.

use crate::error::{NetError, Result};
use crate::queue::ByteQueue;

/// Magic marking the start of a frame.
pub const MAGIC_HEAD: u32 = 0x941B_80A5;
/// Magic marking the end of a frame's payload, just after the zero
/// separator byte.
pub const MAGIC_TAIL: u32 = 0xA58F_6B01;
/// Default payload size limit, per §3/§6.
pub const DEFAULT_MSG_LIMIT: u32 = 1024 * 1024;

const HEADER_LEN: usize = 8; // magic + length
const TRAILER_LEN: usize = 1 + 4 + 4; // zero byte + tail magic + crc

/// Computes the standard (reflected, polynomial `0xEDB8_8320`) CRC-32 of
/// `payload`, matching the checksum the wire format specifies.
pub fn crc32(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Serializes `payload` as a complete framed message.
///
/// `payload.len()` must be in `[1, limit]`, else [`NetError::OutOfRange`].
pub fn encode(payload: &[u8], limit: u32) -> Result<Vec<u8>> {
    let len = payload.len();
    if len == 0 || len as u64 > limit as u64 {
        return Err(NetError::OutOfRange);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + len + TRAILER_LEN);
    out.extend_from_slice(&MAGIC_HEAD.to_be_bytes());
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.push(0);
    out.extend_from_slice(&MAGIC_TAIL.to_be_bytes());
    out.extend_from_slice(&crc32(payload).to_be_bytes());
    Ok(out)
}

/// Result of a single [`FrameReader::advance`] call.
#[derive(Debug)]
pub enum FrameEvent {
    /// The frame is not yet fully buffered; `payload_so_far` bytes of the
    /// payload have arrived (0 while still inside the header).
    Partial { payload_so_far: usize },
    /// A complete, tail-verified frame. The CRC is reported, not verified
    /// by the reader — verification is the caller's responsibility per the
    /// base spec's protocol design.
    Complete { payload: Vec<u8>, declared_crc: u32 },
}

/// Stateful reader for the framed message protocol, driven by repeatedly
/// feeding newly-arrived socket bytes via [`FrameReader::fill`] and calling
/// [`FrameReader::advance`] once per read-ready event.
pub struct FrameReader {
    queue: ByteQueue,
    limit: u32,
}

impl FrameReader {
    pub fn new(limit: u32) -> Self {
        FrameReader { queue: ByteQueue::new(), limit }
    }

    /// Appends freshly-read socket bytes to the internal queue.
    pub fn fill(&mut self, bytes: &[u8]) {
        self.queue.push(bytes);
    }

    /// Number of bytes the caller should still try to read to complete the
    /// frame currently in progress (at least 1); used to size the next
    /// `read` call.
    pub fn want(&self) -> usize {
        if self.queue.length() < HEADER_LEN {
            HEADER_LEN - self.queue.length()
        } else {
            1
        }
    }

    /// Advances frame parsing using whatever has been `fill`-ed so far.
    ///
    /// Returns `Ok(FrameEvent::Partial { .. })` when more bytes are needed,
    /// `Ok(FrameEvent::Complete { .. })` once a full, tail-verified frame is
    /// available (after which only this frame's bytes are consumed from the
    /// queue — any trailing bytes already belong to the next frame and
    /// survive for the next call), or `Err(NetError::InvalidData)` on a
    /// magic mismatch (header or tail), which resets the queue entirely so
    /// the stream can attempt to resynchronize on the next call.
    pub fn advance(&mut self) -> Result<FrameEvent> {
        if self.queue.length() < HEADER_LEN {
            return Ok(FrameEvent::Partial { payload_so_far: 0 });
        }

        let buf = self.queue.buffer();
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC_HEAD {
            self.queue.reset();
            return Err(NetError::InvalidData);
        }
        let len = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        if len == 0 || len > self.limit {
            self.queue.reset();
            return Err(NetError::InvalidData);
        }

        let total = HEADER_LEN + len as usize + TRAILER_LEN;
        self.queue.reserve_total(total);

        if self.queue.length() < total {
            let payload_so_far = self.queue.length().saturating_sub(HEADER_LEN);
            return Ok(FrameEvent::Partial { payload_so_far });
        }

        let buf = self.queue.buffer();
        let payload_end = HEADER_LEN + len as usize;
        let tail_magic =
            u32::from_be_bytes(buf[payload_end + 1..payload_end + 5].try_into().unwrap());
        if tail_magic != MAGIC_TAIL {
            self.queue.reset();
            return Err(NetError::InvalidData);
        }
        let declared_crc =
            u32::from_be_bytes(buf[payload_end + 5..payload_end + 9].try_into().unwrap());
        let payload = buf[HEADER_LEN..payload_end].to_vec();

        // Only this frame's bytes are spent; a following frame may already
        // be sitting in the queue from the same `fill()` call.
        self.queue.consume(total);
        self.queue.compact();
        Ok(FrameEvent::Complete { payload, declared_crc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: &[u8]) -> (Vec<u8>, u32) {
        let wire = encode(payload, DEFAULT_MSG_LIMIT).unwrap();
        (wire, crc32(payload))
    }

    #[test]
    fn encode_then_decode_yields_exact_payload_and_crc() {
        let payload = b"Hello";
        let (wire, expected_crc) = roundtrip(payload);

        let mut reader = FrameReader::new(DEFAULT_MSG_LIMIT);
        reader.fill(&wire);
        match reader.advance().unwrap() {
            FrameEvent::Complete { payload: got, declared_crc } => {
                assert_eq!(got, payload);
                assert_eq!(declared_crc, expected_crc);
                assert_eq!(declared_crc, 0xF7D1_8982);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn byte_at_a_time_feed_eventually_completes() {
        let wire = encode(b"Hello", DEFAULT_MSG_LIMIT).unwrap();
        let mut reader = FrameReader::new(DEFAULT_MSG_LIMIT);
        let mut result = None;
        for b in wire {
            reader.fill(&[b]);
            match reader.advance().unwrap() {
                FrameEvent::Complete { payload, .. } => {
                    result = Some(payload);
                    break;
                }
                FrameEvent::Partial { .. } => continue,
            }
        }
        assert_eq!(result.unwrap(), b"Hello");
    }

    #[test]
    fn zero_length_payload_is_out_of_range() {
        assert!(matches!(encode(b"", DEFAULT_MSG_LIMIT), Err(NetError::OutOfRange)));
    }

    #[test]
    fn payload_at_limit_is_ok_one_past_is_out_of_range() {
        let at_limit = vec![0u8; DEFAULT_MSG_LIMIT as usize];
        assert!(encode(&at_limit, DEFAULT_MSG_LIMIT).is_ok());

        let over = vec![0u8; DEFAULT_MSG_LIMIT as usize + 1];
        assert!(matches!(encode(&over, DEFAULT_MSG_LIMIT), Err(NetError::OutOfRange)));
    }

    #[test]
    fn bad_header_magic_resets_and_reports_invalid_data() {
        let mut reader = FrameReader::new(DEFAULT_MSG_LIMIT);
        reader.fill(&[0, 0, 0, 0, 0, 0, 0, 5]);
        assert!(matches!(reader.advance(), Err(NetError::InvalidData)));
        assert_eq!(reader.queue.length(), 0);
    }

    #[test]
    fn multiple_messages_parse_sequentially_on_one_stream() {
        let mut reader = FrameReader::new(DEFAULT_MSG_LIMIT);
        let mut wire = encode(b"first", DEFAULT_MSG_LIMIT).unwrap();
        wire.extend(encode(b"second", DEFAULT_MSG_LIMIT).unwrap());
        reader.fill(&wire);

        let FrameEvent::Complete { payload, .. } = reader.advance().unwrap() else {
            panic!("expected first frame complete")
        };
        assert_eq!(payload, b"first");

        let FrameEvent::Complete { payload, .. } = reader.advance().unwrap() else {
            panic!("expected second frame complete")
        };
        assert_eq!(payload, b"second");
    }
}
