//! Registry of open streams.
//!
//! Coordinators keep weak references to the streams they open so a single
//! call can close everything still alive on shutdown. The registry never
//! keeps a stream alive on its own.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Non-owning list of live streams.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    entries: Mutex<Vec<Weak<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Registry<T> {
    /// Track a stream.
    pub fn register(&self, entry: &Arc<T>) {
        let mut entries = self.entries.lock();
        entries.retain(|weak| weak.strong_count() > 0);
        entries.push(Arc::downgrade(entry));
    }

    /// Every tracked stream that is still alive, in registration order.
    pub fn live(&self) -> Vec<Arc<T>> {
        let mut entries = self.entries.lock();
        entries.retain(|weak| weak.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }
}
