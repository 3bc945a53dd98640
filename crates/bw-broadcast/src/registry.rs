use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::subscriber::Subscriber;

/// Opaque handle returned by [`SubscriberRegistry::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Concurrent set of subscribers.
///
/// One mutex guards the list. It is held only to add, remove or copy entries
/// and never while a message is being written: `broadcast` works on a
/// snapshot and prunes failures afterwards.
///
/// # Example
/// ```
/// use bw_broadcast::registry::SubscriberRegistry;
/// let registry = SubscriberRegistry::new();
/// assert_eq!(registry.broadcast("{}"), 0);
/// assert!(registry.is_empty());
/// ```
pub struct SubscriberRegistry {
    entries: Mutex<Vec<(SubscriberId, Arc<dyn Subscriber>)>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::info!("Client connecté : {} ({id:?})", subscriber.peer());
        self.entries.lock().push((id, subscriber));
        id
    }

    /// Unregister and close a subscriber. Returns `false` if it was unknown.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            entries
                .iter()
                .position(|(eid, _)| *eid == id)
                .map(|pos| entries.swap_remove(pos).1)
        };
        match removed {
            Some(sub) => {
                sub.close();
                log::info!("Client retiré : {} ({id:?})", sub.peer());
                true
            }
            None => false,
        }
    }

    /// Copy of the current entries, for iteration outside the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Close and drop every subscriber.
    pub fn clear(&self) {
        let drained: Vec<_> = std::mem::take(&mut *self.entries.lock());
        for (_, sub) in &drained {
            sub.close();
        }
        if !drained.is_empty() {
            log::info!("{} client(s) déconnecté(s)", drained.len());
        }
    }

    /// Send `message` to every open subscriber.
    ///
    /// Closed subscribers and those whose send fails are removed; a failure
    /// on one never affects delivery to the others. Returns the number of
    /// successful deliveries.
    pub fn broadcast(&self, message: &str) -> usize {
        let snapshot = self.snapshot();
        let mut delivered = 0;
        let mut stale = Vec::new();

        for (id, sub) in &snapshot {
            if !sub.is_open() {
                stale.push(*id);
                continue;
            }
            match sub.send(message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::debug!("Envoi échoué vers {} : {e}", sub.peer());
                    stale.push(*id);
                }
            }
        }

        for id in stale {
            self.remove(id);
        }
        delivered
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
