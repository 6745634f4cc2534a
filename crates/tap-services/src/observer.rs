//! Observer contract — the boundary between the capture engine and whatever
//! consumes session traffic.
//!
//! The engine hands every framed packet to an [`EventSink`] without waiting
//! on it. Sinks fan events out to [`Observer`]s, each of which receives its
//! own copy of the packet.

use anyhow::Result;

use crate::session::SessionEvent;

/// Consumer of session traffic.
///
/// Observers see packets after framing and session bookkeeping. Errors are
/// logged by the dispatcher and never reach the capture thread.
pub trait Observer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// A packet the client sent. `event.fingerprint` is set and the packet
    /// cursor sits just after it.
    fn packet_sent(&self, event: SessionEvent) -> Result<()>;

    /// A packet the server sent. The packet cursor is at 0.
    fn packet_received(&self, event: SessionEvent) -> Result<()>;
}

/// Where capture threads hand off framed packets. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn emit(&self, event: SessionEvent) {
        self(event)
    }
}
