//! Capture driver — one interception loop for one target address.
//!
//! Every captured segment is resolved to its connection, possibly parsed,
//! and always re-injected exactly once. Parsing never withholds a segment.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tap_core::config::NetworkConfig;
use tap_core::Direction;

use crate::capture::{CaptureBackend, CaptureError, CapturedPacket};
use crate::connection::{ConnectionTable, ParserFactory};

pub struct CaptureDriver {
    target: IpAddr,
    backend: Arc<dyn CaptureBackend>,
    parsers: Arc<dyn ParserFactory>,
    main_server: IpAddr,
    linger: Duration,
    wake_port: u16,
    closed: AtomicBool,
}

impl CaptureDriver {
    pub fn new(
        target: IpAddr,
        backend: Arc<dyn CaptureBackend>,
        parsers: Arc<dyn ParserFactory>,
        network: &NetworkConfig,
    ) -> Self {
        Self {
            target,
            backend,
            parsers,
            main_server: network.main_server,
            linger: network.linger(),
            wake_port: network.wake_port,
            closed: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> IpAddr {
        self.target
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Blocking capture loop. Returns when the backend closes; only a
    /// missing-privilege or backend failure is reported as an error.
    ///
    /// On exit every connection is closed and the backend torn down.
    pub fn scan(&self) -> Result<(), CaptureError> {
        tracing::info!(target_ip = %self.target, "capture driver started");

        let mut table = ConnectionTable::new(self.main_server, self.linger, self.parsers.clone());
        let result = self.run(&mut table);

        table.close_all(Instant::now());
        self.close();

        match result {
            Ok(()) | Err(CaptureError::Closed) => {
                tracing::info!(target_ip = %self.target, connections = table.len(), "capture driver stopped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn run(&self, table: &mut ConnectionTable) -> Result<(), CaptureError> {
        loop {
            let packet = self.backend.recv()?;
            self.inspect(table, &packet);
            self.backend.send(&packet)?;
        }
    }

    fn inspect(&self, table: &mut ConnectionTable, packet: &CapturedPacket) {
        let now = Instant::now();
        let conn = table.get(packet.local(), packet.remote(), now);

        if packet.fin {
            tracing::debug!(channel = %conn.channel(), "connection closing");
            conn.close(now, self.linger);
        } else if conn.is_ignored() {
            tracing::trace!(channel = %conn.channel(), len = packet.payload.len(), "ignored connection");
        } else if !packet.payload.is_empty() {
            conn.parse(Direction::from_outbound(packet.outbound), &packet.payload);
        }
    }

    /// Stop capturing. Idempotent and safe from any thread: the backend is
    /// closed and a one-byte UDP datagram is sent to the target so a
    /// receive parked in the backend observes a packet and returns.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let was_open = self.backend.is_open();
        self.backend.close();
        if was_open {
            self.wake();
        }
    }

    fn wake(&self) {
        if self.wake_port == 0 {
            return;
        }
        let bind: SocketAddr = match self.target {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let sent = UdpSocket::bind(bind)
            .and_then(|socket| socket.send_to(b"\x00", (self.target, self.wake_port)));
        if let Err(e) = sent {
            tracing::debug!(target_ip = %self.target, error = %e, "wake datagram not sent");
        }
    }
}
