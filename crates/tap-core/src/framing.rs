//! Stream framing — turns a TCP byte stream back into application packets.
//!
//! Each packet is preceded by a variable-length integer of up to five
//! bytes: seven payload bits per byte, least significant group first, high
//! bit set while more bytes follow. Outbound packets carry one byte (the
//! fingerprint) that the prefix does not count, so each direction adds its
//! own fixed `extra` to the decoded value.

use bytes::{Buf, BufMut, BytesMut};

use crate::packet::Packet;
use crate::wire::{Direction, FrameError, MAX_PREFIX_BYTES, OUTBOUND_EXTRA};

/// Decode a length prefix from the head of `buf`.
///
/// Returns the value and the number of prefix bytes, or `None` when `buf`
/// ends before the prefix does.
pub fn decode_length(buf: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut value = 0u64;
    for i in 0..MAX_PREFIX_BYTES {
        let Some(&byte) = buf.get(i) else {
            return Ok(None);
        };
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Err(FrameError::MalformedPrefix)
}

/// Append the length prefix for `len`.
pub fn encode_length(len: u32, out: &mut impl BufMut) {
    let mut rest = len;
    loop {
        let byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

/// Frame one packet body for the given direction.
pub fn encode_frame(direction: Direction, body: &[u8]) -> Vec<u8> {
    let extra = extra_for(direction).min(body.len());
    let mut out = Vec::with_capacity(body.len() + MAX_PREFIX_BYTES);
    encode_length((body.len() - extra) as u32, &mut out);
    out.extend_from_slice(body);
    out
}

fn extra_for(direction: Direction) -> usize {
    match direction {
        Direction::Outbound => OUTBOUND_EXTRA,
        Direction::Inbound => 0,
    }
}

/// Per-direction reassembler. Owned by exactly one connection.
#[derive(Debug)]
pub struct FrameReader {
    extra: usize,
    buffer: BytesMut,
    /// Length of the packet being assembled, once its prefix is consumed.
    expected: Option<usize>,
}

impl FrameReader {
    pub fn new(extra: usize) -> Self {
        Self {
            extra,
            buffer: BytesMut::new(),
            expected: None,
        }
    }

    pub fn for_direction(direction: Direction) -> Self {
        Self::new(extra_for(direction))
    }

    /// Bytes buffered but not yet returned as a packet (prefix excluded).
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append a captured TCP payload.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete packet, if the buffer holds one.
    ///
    /// A malformed prefix leaves the stream desynchronised for good; the
    /// caller must stop feeding this reader.
    pub fn next_frame(&mut self) -> Result<Option<Packet>, FrameError> {
        let expected = match self.expected {
            Some(len) => len,
            None => match decode_length(&self.buffer)? {
                Some((len, used)) => {
                    self.buffer.advance(used);
                    let len = len as usize + self.extra;
                    self.expected = Some(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if self.buffer.len() < expected {
            return Ok(None);
        }

        let body = self.buffer.split_to(expected);
        self.expected = None;
        Ok(Some(Packet::from_bytes(body.to_vec())))
    }

    /// Push `data` and drain every packet it completes.
    pub fn consume(&mut self, data: &[u8]) -> Result<Vec<Packet>, FrameError> {
        self.push(data);
        let mut packets = Vec::new();
        while let Some(packet) = self.next_frame()? {
            packets.push(packet);
        }
        Ok(packets)
    }
}
