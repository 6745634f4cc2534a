//! Built-in observer that logs every packet at trace level.

use anyhow::Result;
use tap_core::{CommandCode, Packet};
use tap_services::{Observer, SessionEvent};

#[derive(Debug, Default)]
pub struct PacketTrace;

impl PacketTrace {
    pub fn new() -> Self {
        Self
    }
}

/// Command code at the cursor, without consuming it.
fn peek_code(packet: &Packet) -> Option<CommandCode> {
    let mut peek = packet.copy(true);
    peek.read_code().ok()
}

fn log(event: &SessionEvent) {
    let code = peek_code(&event.packet);
    let name = event.session.identity().map(|i| i.name);
    tracing::trace!(
        session = event.session.id(),
        player = name.as_deref().unwrap_or("-"),
        channel = %event.channel,
        direction = %event.direction,
        fp = ?event.fingerprint,
        code = ?code,
        len = event.packet.len(),
        "packet"
    );
}

impl Observer for PacketTrace {
    fn name(&self) -> &str {
        "trace"
    }

    fn packet_sent(&self, event: SessionEvent) -> Result<()> {
        log(&event);
        Ok(())
    }

    fn packet_received(&self, event: SessionEvent) -> Result<()> {
        log(&event);
        Ok(())
    }
}
