//! Capture backends — where intercepted TCP segments come from and where
//! they are re-injected.
//!
//! A backend is bound to one target address. The capture driver blocks in
//! [`CaptureBackend::recv`] on its own thread; [`CaptureBackend::close`] is
//! called from other threads and must make a parked `recv` return
//! [`CaptureError::Closed`] within a bounded time.

pub mod frame;
pub mod memory;
#[cfg(feature = "pcap")]
pub mod pcap;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;

pub use memory::{MemoryBackend, MemoryFactory, MemoryFeed};

/// One intercepted TCP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    /// Sent by the monitored host (towards the target address).
    pub outbound: bool,
    /// TCP FIN flag.
    pub fin: bool,
    pub payload: Bytes,
}

impl CapturedPacket {
    /// Local (client-side) endpoint of the flow.
    pub fn local(&self) -> SocketAddr {
        if self.outbound {
            self.src
        } else {
            self.dst
        }
    }

    /// Remote (server-side) endpoint of the flow.
    pub fn remote(&self) -> SocketAddr {
        if self.outbound {
            self.dst
        } else {
            self.src
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("packet capture requires administrator privileges")]
    PermissionDenied,
    #[error("capture handle is closed")]
    Closed,
    #[error("capture I/O error: {0}")]
    Io(std::io::Error),
    #[error("capture backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            return CaptureError::PermissionDenied;
        }
        match e.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => CaptureError::PermissionDenied,
            Some(libc::EBADF) => CaptureError::Closed,
            _ => CaptureError::Io(e),
        }
    }
}

/// Interception handle for one target address.
pub trait CaptureBackend: Send + Sync {
    /// Block until the next segment is intercepted.
    fn recv(&self) -> Result<CapturedPacket, CaptureError>;

    /// Re-inject a segment unchanged. Passive backends do nothing.
    fn send(&self, packet: &CapturedPacket) -> Result<(), CaptureError>;

    /// Tear the handle down. Idempotent; safe while `recv` is blocked.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Opens backends for new target addresses.
pub trait BackendFactory: Send + Sync {
    fn open(&self, target: IpAddr) -> Result<Arc<dyn CaptureBackend>, CaptureError>;
}
