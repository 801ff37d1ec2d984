//! Identifier-keyed listener registry.
//!
//! Dispatch snapshots the listeners for a key and releases the lock before
//! invoking them, so listeners may subscribe or unsubscribe (themselves or
//! others) from inside a callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

use fastdl_protocol::{ProgressUpdate, UploadId};

/// Callback invoked for every progress update of a subscribed upload.
pub type Listener = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    target: UploadId,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Maps upload identifiers to the listeners interested in them.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Listeners never run under the lock, so poisoning can only come
        // from a panic inside this module; the map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `listener` for `target`.
    pub fn add(&self, target: &UploadId, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.lock();
        entries
            .entry(target.key())
            .or_insert_with(|| Entry {
                target: target.clone(),
                listeners: Vec::new(),
            })
            .listeners
            .push((id, listener));
        id
    }

    /// Registers `listener` and returns a guard that removes it on drop.
    pub fn subscribe(self: &Arc<Self>, target: &UploadId, listener: Listener) -> Subscription {
        let id = self.add(target, listener);
        Subscription {
            registry: Arc::downgrade(self),
            key: target.key(),
            id,
            active: true,
        }
    }

    /// Removes one listener. Returns `false` if it was not registered.
    ///
    /// The key itself is dropped together with its last listener.
    pub fn remove(&self, key: &str, id: ListenerId) -> bool {
        // Removed listeners are dropped after the lock is released: their
        // captures may own a Subscription whose drop re-enters the registry.
        let removed: Vec<(ListenerId, Listener)> = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut entry.listeners)
                .into_iter()
                .partition(|(lid, _)| *lid == id);
            entry.listeners = kept;
            if entry.listeners.is_empty() {
                entries.remove(key);
            }
            removed
        };
        !removed.is_empty()
    }

    /// Delivers `update` to every listener registered for its target and
    /// returns how many listeners were called.
    pub fn dispatch(&self, update: &ProgressUpdate) -> usize {
        let key = update.target.key();
        let snapshot: Vec<Listener> = match self.lock().get(&key) {
            Some(entry) => entry.listeners.iter().map(|(_, l)| l.clone()).collect(),
            None => Vec::new(),
        };

        if snapshot.is_empty() {
            trace!(target = %key, phase = %update.phase, "no listeners for progress update");
            return 0;
        }

        for listener in &snapshot {
            listener(update);
        }
        snapshot.len()
    }

    /// Identifiers that currently have at least one listener.
    pub fn targets(&self) -> Vec<UploadId> {
        self.lock().values().map(|e| e.target.clone()).collect()
    }

    /// Number of listeners registered under `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, |e| e.listeners.len())
    }

    /// Number of identifiers with live listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration guard returned by [`ListenerRegistry::subscribe`].
///
/// The listener is removed exactly once: on [`Subscription::unsubscribe`]
/// or when the guard is dropped, whichever comes first.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    key: String,
    id: ListenerId,
    active: bool,
}

impl Subscription {
    /// Correlation key of the subscribed upload.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Removes the listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.key, self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
