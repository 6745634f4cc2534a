//! Pending-bulle registry — sessions waiting for their bulle connection.
//!
//! The main server announces a bulle switch with a 12-byte correlation key;
//! the client then opens a new connection whose handshake carries the same
//! key. Entries are inserted by the main connection and claimed (removed)
//! by the bulle connection, from different capture threads.

use std::sync::Arc;

use dashmap::DashMap;
use tap_core::CorrelationKey;

use crate::session::Session;

#[derive(Debug, Clone, Default)]
pub struct PendingRegistry {
    entries: Arc<DashMap<CorrelationKey, Arc<Session>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under `key`. A later switch with the same key
    /// overwrites the earlier entry.
    pub fn insert(&self, key: CorrelationKey, session: Arc<Session>) {
        tracing::debug!(key = hex::encode(key), session = session.id(), "bulle switch pending");
        self.entries.insert(key, session);
    }

    /// Atomically remove and return the session registered under `key`.
    /// At most one caller gets a given entry.
    pub fn claim(&self, key: &CorrelationKey) -> Option<Arc<Session>> {
        self.entries.remove(key).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
