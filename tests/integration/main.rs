//! tap integration test harness.
//!
//! Tests drive the whole engine (scanner, capture drivers, session linker,
//! observer dispatch) through the in-memory capture backend. No privileges
//! or network access are needed.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use tap_core::config::NetworkConfig;
use tap_core::framing::encode_frame;
use tap_core::{CommandCode, CorrelationKey, Direction, Packet};
use tap_services::{Observer, PendingRegistry, SessionEvent};
use tapd::capture::{MemoryFactory, MemoryFeed};
use tapd::{CapturedPacket, LinkStats, ObserverDispatcher, Scanner};

mod fail_open;
mod key_recovery;
mod linking;
mod observers;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const MAIN_SERVER: &str = "51.75.130.180";
pub const BULLE_SERVER: &str = "51.75.130.190";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Observer that keeps every event it is given.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<SessionEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl Observer for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn packet_sent(&self, event: SessionEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    fn packet_received(&self, event: SessionEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// A running engine over in-memory backends.
pub struct Engine {
    pub scanner: Scanner,
    pub stats: Arc<LinkStats>,
    pub registry: PendingRegistry,
    pub backends: Arc<MemoryFactory>,
    pub recorder: Arc<Recorder>,
    shutdown: broadcast::Sender<()>,
}

impl Engine {
    pub fn start() -> Self {
        Self::start_with(NetworkConfig::default(), Vec::new())
    }

    /// Start with extra observers registered ahead of the recorder.
    pub fn start_with(network: NetworkConfig, observers: Vec<Arc<dyn Observer>>) -> Self {
        let network = NetworkConfig {
            wake_port: 0,
            ..network
        };
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = ObserverDispatcher::new();
        for observer in observers {
            dispatcher.register(observer);
        }
        dispatcher.register(recorder.clone());

        let (shutdown, _) = broadcast::channel(1);
        let (sink, _task) = dispatcher.spawn(shutdown.subscribe());

        let registry = PendingRegistry::new();
        let backends = Arc::new(MemoryFactory::new());
        let (scanner, stats) = Scanner::with_linker(
            network,
            backends.clone(),
            Handle::current(),
            registry.clone(),
            Arc::new(sink),
        );

        Self {
            scanner,
            stats,
            registry,
            backends,
            recorder,
            shutdown,
        }
    }

    /// Monitor `target` and return its feed.
    pub fn watch(&self, target: &str) -> MemoryFeed {
        self.scanner.add(ip(target)).unwrap();
        self.backends.feed(ip(target))
    }

    pub fn stop(&self) {
        self.scanner.stop();
        let _ = self.shutdown.send(());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// One client-side TCP flow to a server.
#[derive(Debug, Clone, Copy)]
pub struct Flow {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl Flow {
    pub fn new(local: &str, remote: &str) -> Self {
        Self {
            local: local.parse().unwrap(),
            remote: remote.parse().unwrap(),
        }
    }

    pub fn outbound_raw(&self, payload: impl Into<Bytes>) -> CapturedPacket {
        CapturedPacket {
            src: self.local,
            dst: self.remote,
            outbound: true,
            fin: false,
            payload: payload.into(),
        }
    }

    pub fn inbound_raw(&self, payload: impl Into<Bytes>) -> CapturedPacket {
        CapturedPacket {
            src: self.remote,
            dst: self.local,
            outbound: false,
            fin: false,
            payload: payload.into(),
        }
    }

    /// Framed client packet: fingerprint, code, body.
    pub fn send(&self, fp: u8, code: CommandCode, body: &[u8]) -> CapturedPacket {
        let mut packet = Packet::new();
        packet.write_u8(fp).write_code(code).write_bytes(body);
        self.outbound_raw(encode_frame(Direction::Outbound, packet.as_bytes()))
    }

    /// Framed server packet: code, body.
    pub fn recv(&self, code: CommandCode, body: &[u8]) -> CapturedPacket {
        let mut packet = Packet::with_code(code);
        packet.write_bytes(body);
        self.inbound_raw(encode_frame(Direction::Inbound, packet.as_bytes()))
    }

    pub fn fin(&self) -> CapturedPacket {
        CapturedPacket {
            fin: true,
            ..self.outbound_raw(Bytes::new())
        }
    }
}

pub fn switch_body(key: &CorrelationKey, address: &str) -> Vec<u8> {
    let mut packet = Packet::new();
    packet.write_bytes(key).write_utf(address);
    packet.into_bytes()
}
