//! tap-core — packet codec, stream framing, chat cipher and configuration.
//! All other tap crates depend on this one.

pub mod cipher;
pub mod config;
pub mod framing;
pub mod packet;
pub mod wire;

pub use cipher::{KeyRecovery, MessageKey};
pub use framing::FrameReader;
pub use packet::Packet;
pub use wire::{CommandCode, CorrelationKey, Direction, FrameError, PacketError};
