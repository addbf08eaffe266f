//! ctrl/registry — the process-wide list of live control channels.
//!
//! The registry never keeps a channel alive: it stores weak handles, and the
//! channel deregisters itself exactly once when its last strong owner drops.
//! Insertion and removal take the write lock; membership checks take the
//! read lock and stay off the hot path.
//!
//! There is no static global here: the registry is owned by the engine
//! context ([`crate::store::SnapCtx`]) and torn down with it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, Weak};

use log::error;

use super::channel::CtrlChannel;

pub struct ChannelRegistry {
    inner: RwLock<HashMap<u64, Weak<CtrlChannel>>>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry {
            inner: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, id: u64, channel: Weak<CtrlChannel>) {
        let mut g = self.inner.write().unwrap();
        g.insert(id, channel);
    }

    /// Called from the channel's drop; the id leaves the list exactly once.
    pub(crate) fn deregister(&self, id: u64) {
        let mut g = self.inner.write().unwrap();
        g.remove(&id);
    }

    /// Live channel count.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Teardown check. Cleanup at this point is advisory: leftover channels
    /// are logged, not asserted on.
    pub fn done(&self) {
        let leftover = self.len();
        if leftover != 0 {
            error!(
                "unable to perform ctrl channel cleanup: {} channels still registered",
                leftover
            );
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
