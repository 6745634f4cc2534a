//! In-memory capture backend.
//!
//! Segments are fed through a [`MemoryFeed`] and every re-injected segment
//! is recorded, so the whole engine can be driven without a packet filter.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{BackendFactory, CaptureBackend, CaptureError, CapturedPacket};

enum Feed {
    Packet(CapturedPacket),
    Deny,
    Wake,
}

type SentLog = Arc<Mutex<Vec<CapturedPacket>>>;

pub struct MemoryBackend {
    rx: Mutex<mpsc::UnboundedReceiver<Feed>>,
    wake: mpsc::UnboundedSender<Feed>,
    open: AtomicBool,
    sent: SentLog,
}

/// Producer side of a [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryFeed {
    tx: mpsc::UnboundedSender<Feed>,
    sent: SentLog,
}

/// Create a connected backend/feed pair.
pub fn channel() -> (MemoryBackend, MemoryFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = SentLog::default();
    let backend = MemoryBackend {
        rx: Mutex::new(rx),
        wake: tx.clone(),
        open: AtomicBool::new(true),
        sent: sent.clone(),
    };
    (backend, MemoryFeed { tx, sent })
}

impl CaptureBackend for MemoryBackend {
    fn recv(&self) -> Result<CapturedPacket, CaptureError> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !self.is_open() {
                return Err(CaptureError::Closed);
            }
            match rx.blocking_recv() {
                Some(Feed::Packet(packet)) if self.is_open() => return Ok(packet),
                Some(Feed::Deny) => return Err(CaptureError::PermissionDenied),
                Some(_) => continue,
                None => {
                    self.open.store(false, Ordering::Release);
                    return Err(CaptureError::Closed);
                }
            }
        }
    }

    fn send(&self, packet: &CapturedPacket) -> Result<(), CaptureError> {
        if !self.is_open() {
            return Err(CaptureError::Closed);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet.clone());
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.wake.send(Feed::Wake);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl MemoryFeed {
    /// Queue a segment for capture. False once the backend is gone.
    pub fn inject(&self, packet: CapturedPacket) -> bool {
        self.tx.send(Feed::Packet(packet)).is_ok()
    }

    /// Make the next receive fail as if privileges were missing.
    pub fn deny(&self) {
        let _ = self.tx.send(Feed::Deny);
    }

    /// Every segment re-injected so far, in order.
    pub fn sent(&self) -> Vec<CapturedPacket> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct Slot {
    feed: MemoryFeed,
    backend: Option<MemoryBackend>,
}

/// Hands out in-memory backends per target address. Feeds can be taken
/// before or after the backend is opened.
#[derive(Default)]
pub struct MemoryFactory {
    slots: DashMap<IpAddr, Slot>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The feed for `target`, creating the pair if needed.
    pub fn feed(&self, target: IpAddr) -> MemoryFeed {
        self.slots
            .entry(target)
            .or_insert_with(|| {
                let (backend, feed) = channel();
                Slot {
                    feed,
                    backend: Some(backend),
                }
            })
            .feed
            .clone()
    }

    pub fn is_opened(&self, target: IpAddr) -> bool {
        self.slots
            .get(&target)
            .is_some_and(|slot| slot.backend.is_none())
    }
}

impl BackendFactory for MemoryFactory {
    fn open(&self, target: IpAddr) -> Result<Arc<dyn CaptureBackend>, CaptureError> {
        let backend = match self.slots.entry(target) {
            Entry::Occupied(mut slot) => {
                let unopened = slot.get_mut().backend.take();
                match unopened {
                    Some(backend) => backend,
                    None => {
                        // reopened after a close: start a fresh pair
                        let (backend, feed) = channel();
                        slot.insert(Slot {
                            feed,
                            backend: None,
                        });
                        backend
                    }
                }
            }
            Entry::Vacant(slot) => {
                let (backend, feed) = channel();
                slot.insert(Slot {
                    feed,
                    backend: None,
                });
                backend
            }
        };
        Ok(Arc::new(backend))
    }
}
