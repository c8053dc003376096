//! Client-side notification state.
//!
//! Holds received notifications most-recent-first (receipt order, never
//! re-sorted by `timestamp`) and owns read/unread, expiry and deletion.
//! All mutations are serialized through one lock, and each one publishes a
//! fresh [`StoreSnapshot`] on a `watch` channel so UIs can re-render.
//!
//! Non-reminder notifications expire `retention` after receipt. Each expiry
//! timer is its own task and is aborted when the record is cleared first.
//!
//! Mutating methods that schedule timers must be called from inside a Tokio
//! runtime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::connection::ReceiptSink;
use crate::models::notification::generate_id;
use crate::models::{Notification, NotificationEvent};
use crate::protocol::PushEvent;

/// Point-in-time view published after every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

impl StoreSnapshot {
    fn of(list: &VecDeque<Notification>) -> Self {
        Self {
            notifications: list.iter().cloned().collect(),
            unread_count: unread(list),
        }
    }
}

fn unread(list: &VecDeque<Notification>) -> usize {
    list.iter().filter(|n| !n.read).count()
}

#[derive(Default)]
struct StoreState {
    notifications: VecDeque<Notification>,
    expiry: HashMap<String, JoinHandle<()>>,
}

struct StoreInner {
    config: StoreConfig,
    state: Mutex<StoreState>,
    changes: watch::Sender<StoreSnapshot>,
    receipts: Option<Arc<dyn ReceiptSink>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        for (_, timer) in self.state.get_mut().expiry.drain() {
            timer.abort();
        }
    }
}

#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<StoreInner>,
}

impl NotificationStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::build(config, None)
    }

    /// Store that reports read transitions through `receipts`.
    pub fn with_receipts(config: StoreConfig, receipts: Arc<dyn ReceiptSink>) -> Self {
        Self::build(config, Some(receipts))
    }

    fn build(config: StoreConfig, receipts: Option<Arc<dyn ReceiptSink>>) -> Self {
        let (changes, _) = watch::channel(StoreSnapshot::default());
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: Mutex::new(StoreState::default()),
                changes,
                receipts,
            }),
        }
    }

    /// Materializes `event` at the head of the list and returns its id.
    pub fn add_notification(&self, event: NotificationEvent) -> String {
        let mut state = self.inner.state.lock();

        let mut notification = Notification::from_event(event);
        let live: HashSet<&str> = state.notifications.iter().map(|n| n.id.as_str()).collect();
        while live.contains(notification.id.as_str()) {
            notification.id = generate_id(notification.kind(), chrono::Utc::now());
        }
        drop(live);

        let id = notification.id.clone();
        let kind = notification.kind();
        state.notifications.push_front(notification);

        if kind.expires() {
            let timer = self.spawn_expiry(id.clone());
            state.expiry.insert(id.clone(), timer);
        }

        debug!(notification_id = %id, kind = %kind, "notification added");
        self.inner.publish(&state);
        id
    }

    fn spawn_expiry(&self, id: String) -> JoinHandle<()> {
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let retention = self.inner.config.retention();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(inner) = store.upgrade() {
                inner.expire(&id);
            }
        })
    }

    /// Flips `id` to read and sends a read receipt. Missing or already-read
    /// ids are ignored.
    pub fn mark_as_read(&self, id: &str) {
        let changed = {
            let mut state = self.inner.state.lock();
            let changed = match state.notifications.iter_mut().find(|n| n.id == id) {
                Some(n) if !n.read => {
                    n.read = true;
                    true
                }
                _ => false,
            };
            if changed {
                self.inner.publish(&state);
            }
            changed
        };

        if changed {
            if let Some(receipts) = &self.inner.receipts {
                receipts.send_read_receipt(id);
            }
        } else {
            trace!(notification_id = id, "mark_as_read: nothing to do");
        }
    }

    pub fn mark_all_as_read(&self) {
        let mut state = self.inner.state.lock();
        if unread(&state.notifications) == 0 {
            return;
        }
        for n in state.notifications.iter_mut() {
            n.read = true;
        }
        self.inner.publish(&state);
    }

    /// Removes `id` and cancels its expiry timer. Missing ids are ignored.
    pub fn clear_notification(&self, id: &str) {
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.expiry.remove(id) {
            timer.abort();
        }
        let before = state.notifications.len();
        state.notifications.retain(|n| n.id != id);
        if state.notifications.len() != before {
            self.inner.publish(&state);
        }
    }

    /// Removes everything, reminders included.
    pub fn clear_all_notifications(&self) {
        let mut state = self.inner.state.lock();
        for (_, timer) in state.expiry.drain() {
            timer.abort();
        }
        if state.notifications.is_empty() {
            return;
        }
        state.notifications.clear();
        self.inner.publish(&state);
    }

    /// Dispatcher entry point: stores notification events, ignores the rest.
    pub fn handle_event(&self, event: &PushEvent) -> anyhow::Result<()> {
        if let Some(notification) = event.notification() {
            self.add_notification(notification.clone());
        }
        Ok(())
    }

    /// Most recent first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.state.lock().notifications.iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.inner
            .state
            .lock()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn unread_count(&self) -> usize {
        unread(&self.inner.state.lock().notifications)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::of(&self.inner.state.lock().notifications)
    }

    /// Receiver that observes a new snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.changes.subscribe()
    }

    /// Number of pending expiry timers.
    pub fn pending_expiries(&self) -> usize {
        self.inner.state.lock().expiry.len()
    }
}

impl StoreInner {
    fn publish(&self, state: &StoreState) {
        self.changes.send_replace(StoreSnapshot::of(&state.notifications));
    }

    fn expire(&self, id: &str) {
        let mut state = self.state.lock();
        state.expiry.remove(id);
        let before = state.notifications.len();
        state.notifications.retain(|n| n.id != id);
        if state.notifications.len() != before {
            debug!(notification_id = id, "notification expired");
            self.publish(&state);
        }
    }
}
