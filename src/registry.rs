use crate::Websocket;
use parking_lot::{const_mutex, Mutex};
use std::sync::{Arc, Weak};

static GLOBAL: Registry = Registry::new();

/// Non-owning collection of live connections.
///
/// Entries never keep a connection alive: once the last [Arc] to a
/// [Websocket] is dropped the entry stops being reported, whether or not the
/// connection was ever closed.
#[derive(Debug)]
pub struct Registry {
    entries: Mutex<Vec<Weak<Websocket>>>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            entries: const_mutex(Vec::new()),
        }
    }

    /// Process-wide registry used by [Websocket::serve].
    #[inline]
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    pub fn register(&self, ws: &Arc<Websocket>) {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.push(Arc::downgrade(ws));
    }

    /// Snapshot of the connections that are still reachable.
    pub fn live_instances(&self) -> Vec<Arc<Websocket>> {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn count(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
