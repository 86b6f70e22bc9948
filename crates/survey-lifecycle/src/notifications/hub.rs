use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use tracing::{debug, warn};

use super::domain::{
    NewNotification, Notification, NotificationError, NotificationFilter, NotificationId,
    NotificationSort, NotificationStats,
};
use super::store::NotificationStore;
use crate::clock::Clock;

pub const DEFAULT_MAX_NOTIFICATIONS: usize = 5;

/// Bounded store of user-facing messages, newest first.
///
/// Every mutation is written through to the configured [`NotificationStore`];
/// a failed write is logged and the in-memory list stays authoritative.
/// The write happens on the caller's thread after the list lock is released,
/// and a snapshot older than one already saved is never written.
/// Eviction is strictly by insertion order: once the list is full the oldest
/// entry is dropped whatever its priority.
pub struct NotificationHub {
    entries: Mutex<VecDeque<Notification>>,
    revision: AtomicU64,
    saved_revision: Mutex<u64>,
    capacity: usize,
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
}

/// Snapshot taken under the list lock, written once the lock is gone.
struct PendingSave {
    revision: u64,
    entries: Vec<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize, store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            revision: AtomicU64::new(0),
            saved_revision: Mutex::new(0),
            capacity: capacity.max(1),
            store,
            clock,
        }
    }

    /// Build a hub seeded with whatever the store holds. A store that cannot
    /// be read yields an empty hub.
    pub fn restore(capacity: usize, store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        let hub = Self::new(capacity, store, clock);
        match hub.store.load() {
            Ok(mut loaded) => {
                loaded.truncate(hub.capacity);
                debug!(count = loaded.len(), "restored persisted notifications");
                *hub.lock() = loaded.into();
            }
            Err(err) => warn!(error = %err, "unable to restore notifications; starting empty"),
        }
        hub
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn create(&self, input: NewNotification) -> Notification {
        let notification = Notification {
            id: NotificationId::generate(),
            kind: input.kind,
            priority: input.priority,
            title: input.title,
            message: input.message,
            metadata: input.metadata,
            created_at: self.clock.now(),
            read: false,
            dismissed: false,
        };

        let pending = {
            let mut entries = self.lock();
            entries.push_front(notification.clone());
            while entries.len() > self.capacity {
                if let Some(evicted) = entries.pop_back() {
                    debug!(id = %evicted.id, priority = ?evicted.priority, "evicted oldest notification");
                }
            }
            self.stage(&entries)
        };
        self.persist(pending);

        notification
    }

    pub fn get(&self, id: &NotificationId) -> Option<Notification> {
        self.lock().iter().find(|entry| &entry.id == id).cloned()
    }

    pub fn mark_as_read(&self, id: &NotificationId) -> Result<Notification, NotificationError> {
        self.update(id, |entry| entry.read = true)
    }

    /// Soft delete: hidden from active views, still reachable through `get`.
    pub fn dismiss(&self, id: &NotificationId) -> Result<Notification, NotificationError> {
        self.update(id, |entry| entry.dismissed = true)
    }

    pub fn remove(&self, id: &NotificationId) -> Result<Notification, NotificationError> {
        let (removed, pending) = {
            let mut entries = self.lock();
            let index = entries
                .iter()
                .position(|entry| &entry.id == id)
                .ok_or_else(|| NotificationError::NotFound(id.clone()))?;
            let removed = entries
                .remove(index)
                .ok_or_else(|| NotificationError::NotFound(id.clone()))?;
            (removed, self.stage(&entries))
        };
        self.persist(pending);
        Ok(removed)
    }

    pub fn clear_all(&self) {
        let pending = {
            let mut entries = self.lock();
            entries.clear();
            self.stage(&entries)
        };
        self.persist(pending);
    }

    /// Returns how many entries flipped from unread to read.
    pub fn mark_all_as_read(&self) -> usize {
        let (changed, pending) = {
            let mut entries = self.lock();
            let mut changed = 0;
            for entry in entries.iter_mut().filter(|entry| entry.is_active() && !entry.read) {
                entry.read = true;
                changed += 1;
            }
            (changed, (changed > 0).then(|| self.stage(&entries)))
        };
        if let Some(pending) = pending {
            self.persist(pending);
        }
        changed
    }

    /// Copy of the matching entries in the requested order.
    pub fn list(&self, filter: &NotificationFilter, sort: NotificationSort) -> Vec<Notification> {
        // The deque is already newest-first by insertion.
        let mut matching: Vec<Notification> = self
            .lock()
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();

        match sort {
            NotificationSort::Newest => {}
            NotificationSort::Oldest => matching.reverse(),
            NotificationSort::Priority => {
                matching.sort_by(|a, b| b.priority.cmp(&a.priority));
            }
        }
        matching
    }

    /// Active (non-dismissed) entries, newest first.
    pub fn active(&self) -> Vec<Notification> {
        self.list(&NotificationFilter::default(), NotificationSort::Newest)
    }

    pub fn stats(&self) -> NotificationStats {
        let cutoff = self.clock.now() - Duration::hours(24);
        let mut stats = NotificationStats::default();

        for entry in self.lock().iter().filter(|entry| entry.is_active()) {
            stats.total += 1;
            if !entry.read {
                stats.unread += 1;
            }
            *stats.by_kind.entry(entry.kind).or_default() += 1;
            *stats.by_priority.entry(entry.priority).or_default() += 1;
            if entry.created_at > cutoff {
                stats.recent_count += 1;
            }
        }

        stats
    }

    fn update<F>(&self, id: &NotificationId, apply: F) -> Result<Notification, NotificationError>
    where
        F: FnOnce(&mut Notification),
    {
        let (updated, pending) = {
            let mut entries = self.lock();
            let entry = entries
                .iter_mut()
                .find(|entry| &entry.id == id)
                .ok_or_else(|| NotificationError::NotFound(id.clone()))?;
            apply(entry);
            let updated = entry.clone();
            (updated, self.stage(&entries))
        };
        self.persist(pending);
        Ok(updated)
    }

    /// Must be called with the list lock held so revisions follow mutation order.
    fn stage(&self, entries: &VecDeque<Notification>) -> PendingSave {
        PendingSave {
            revision: self.revision.fetch_add(1, Ordering::AcqRel) + 1,
            entries: entries.iter().cloned().collect(),
        }
    }

    fn persist(&self, pending: PendingSave) {
        let mut saved = self
            .saved_revision
            .lock()
            .expect("notification save mutex poisoned");
        if pending.revision <= *saved {
            debug!(revision = pending.revision, saved = *saved, "newer notification snapshot already saved");
            return;
        }
        match self.store.save(&pending.entries) {
            Ok(()) => *saved = pending.revision,
            Err(err) => {
                warn!(error = %err, count = pending.entries.len(), "failed to persist notifications")
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Notification>> {
        self.entries.lock().expect("notification mutex poisoned")
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("capacity", &self.capacity)
            .field("len", &self.lock().len())
            .finish()
    }
}
