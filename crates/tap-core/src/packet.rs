//! Packet codec — a cursor over one framed application packet.
//!
//! Reads advance the cursor and fail with `PacketError::Underflow` rather
//! than reading past the end. Writes always append. All integers are
//! big-endian; strings are a u16 byte length followed by raw UTF-8.

use std::fmt;

use bytes::BufMut;

use crate::cipher::MessageKey;
use crate::wire::{CommandCode, PacketError};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Packet {
    buffer: Vec<u8>,
    pos: usize,
}

impl Packet {
    /// An empty packet, ready for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A packet over the given bytes with the cursor at 0.
    pub fn from_bytes(buffer: impl Into<Vec<u8>>) -> Self {
        Self {
            buffer: buffer.into(),
            pos: 0,
        }
    }

    /// A new packet whose body starts with `code`.
    pub fn with_code(code: CommandCode) -> Self {
        let mut packet = Self::new();
        packet.write_code(code);
        packet
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor. Positions past the end are clamped.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.buffer.len());
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// An independent copy. The cursor is kept only if `keep_pos` is set.
    pub fn copy(&self, keep_pos: bool) -> Self {
        Self {
            buffer: self.buffer.clone(),
            pos: if keep_pos { self.pos } else { 0 },
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8], PacketError> {
        if self.remaining() < n {
            return Err(PacketError::Underflow {
                needed: n,
                pos: self.pos,
                len: self.buffer.len(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buffer[start..self.pos])
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u24(&mut self) -> Result<u32, PacketError> {
        let [a, b, c] = self.read_array::<3>()?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// One byte; only 1 reads as true.
    pub fn read_bool(&mut self) -> Result<bool, PacketError> {
        Ok(self.read_u8()? == 1)
    }

    pub fn read_code(&mut self) -> Result<CommandCode, PacketError> {
        let [major, minor] = self.read_array::<2>()?;
        Ok(CommandCode::new(major, minor))
    }

    /// Length-prefixed raw string bytes.
    pub fn read_string(&mut self) -> Result<Vec<u8>, PacketError> {
        let len = self.read_u16()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_utf(&mut self) -> Result<String, PacketError> {
        String::from_utf8(self.read_string()?).map_err(|_| PacketError::InvalidUtf8)
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.put_slice(data);
        self
    }

    pub fn write_code(&mut self, code: CommandCode) -> &mut Self {
        self.buffer.put_u8(code.major);
        self.buffer.put_u8(code.minor);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.put_u8(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.put_u16(value);
        self
    }

    /// Low 24 bits of `value`.
    pub fn write_u24(&mut self, value: u32) -> &mut Self {
        self.buffer.put_slice(&value.to_be_bytes()[1..]);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.put_u32(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    /// Strings longer than u16::MAX bytes are truncated to fit the prefix.
    pub fn write_string(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len().min(u16::MAX as usize);
        self.buffer.put_u16(len as u16);
        self.buffer.put_slice(&data[..len]);
        self
    }

    pub fn write_utf(&mut self, text: &str) -> &mut Self {
        self.write_string(text.as_bytes())
    }

    // ── Cipher ────────────────────────────────────────────────────────────────

    /// XOR `buffer[offset..]` with the message keystream for fingerprint `fp`.
    /// Applying it twice restores the original bytes.
    pub fn xor_cipher(&mut self, key: &MessageKey, fp: u8, offset: usize) -> &mut Self {
        if offset < self.buffer.len() {
            key.apply(fp, &mut self.buffer[offset..]);
        }
        self
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("pos", &self.pos)
            .field("buffer", &hex::encode(&self.buffer))
            .finish()
    }
}
