//! Wire constants — command codes, key sizes and framing limits of the
//! game protocol as it appears on the captured TCP streams.
//!
//! Every application packet is length-prefixed (see `framing`). Outbound
//! packets carry one extra leading byte, the fingerprint, which the length
//! prefix does not count. After that comes a two-byte command code that
//! routes the packet.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

// ── Command Codes ─────────────────────────────────────────────────────────────

/// Two-byte routing code at the head of every packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandCode {
    pub major: u8,
    pub minor: u8,
}

impl CommandCode {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Handshake sent by the client as the first packet on a main connection.
    pub const MAIN_HANDSHAKE: CommandCode = CommandCode::new(28, 1);

    /// Handshake sent by the client as the first packet on a bulle connection.
    pub const BULLE_HANDSHAKE: CommandCode = CommandCode::new(44, 1);

    /// Server → client on the main connection: connect to this bulle.
    /// Carries the 12-byte correlation key followed by the bulle address.
    pub const BULLE_SWITCH: CommandCode = CommandCode::new(44, 1);

    /// Server → client: login accepted, carries the account identity.
    pub const LOGIN: CommandCode = CommandCode::new(26, 2);

    /// Chat message. Outbound it is ciphered, inbound the server echoes
    /// the plaintext back to the sender.
    pub const CHAT: CommandCode = CommandCode::new(6, 6);
}

impl From<(u8, u8)> for CommandCode {
    fn from((major, minor): (u8, u8)) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.major, self.minor)
    }
}

// ── Direction ─────────────────────────────────────────────────────────────────

/// Packet direction relative to the monitored host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → server.
    Outbound,
    /// Server → client.
    Inbound,
}

impl Direction {
    pub fn from_outbound(outbound: bool) -> Self {
        if outbound {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }

    pub fn is_outbound(self) -> bool {
        matches!(self, Direction::Outbound)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("outbound"),
            Direction::Inbound => f.write_str("inbound"),
        }
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Address of the well-known main server. Any other monitored address is
/// treated as a bulle relay.
pub const DEFAULT_MAIN_SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(51, 75, 130, 180));

/// Size of the key the main connection hands to its bulle connection.
pub const CORRELATION_KEY_LEN: usize = 12;

/// Size of the chat stream-cipher key.
pub const CIPHER_KEY_LEN: usize = 20;

/// Longest legal length prefix, in bytes.
pub const MAX_PREFIX_BYTES: usize = 5;

/// Bytes preceding the command code in an outbound packet (the fingerprint).
pub const OUTBOUND_EXTRA: usize = 1;

/// Default grace period a closing connection stays in its table.
pub const DEFAULT_LINGER_MS: u64 = 1_000;

/// Default UDP port of the stimulus that unblocks a parked capture receive.
pub const DEFAULT_WAKE_PORT: u16 = 6666;

/// Correlation key that pairs a bulle connection with its main session.
pub type CorrelationKey = [u8; CORRELATION_KEY_LEN];

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while reading a packet body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("read of {needed} bytes at offset {pos} overruns packet of {len} bytes")]
    Underflow { needed: usize, pos: usize, len: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors raised while splitting a byte stream into packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("length prefix still continues after {} bytes", MAX_PREFIX_BYTES)]
    MalformedPrefix,
}
