//! In-process publish/subscribe registry.
//!
//! Handlers are keyed by [`EventName`]. [`EventDispatcher::subscribe`] returns a
//! [`Subscription`] that unregisters its handler when dropped;
//! [`EventDispatcher::on`] / [`EventDispatcher::off`] give manual control.
//!
//! Emission is synchronous. The handler list is snapshotted before any handler
//! runs, so handlers may (un)subscribe from inside a callback without
//! affecting the current emission.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::protocol::{EventName, PushEvent};

pub type Handler = Arc<dyn Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Registry {
    handlers: DashMap<EventName, Vec<(HandlerId, Handler)>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<Registry>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for every future `event`.
    pub fn on<F>(&self, event: EventName, handler: F) -> HandlerId
    where
        F: Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one handler, or all handlers for `event` when `handler` is
    /// `None`. Unknown ids are ignored.
    pub fn off(&self, event: EventName, handler: Option<HandlerId>) {
        match handler {
            Some(id) => {
                let now_empty = match self.inner.handlers.get_mut(&event) {
                    Some(mut list) => {
                        list.retain(|(h, _)| *h != id);
                        list.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.inner.handlers.remove_if(&event, |_, list| list.is_empty());
                }
            }
            None => {
                self.inner.handlers.remove(&event);
            }
        }
    }

    /// Like [`on`](Self::on) but unregisters when the returned handle drops.
    pub fn subscribe<F>(&self, event: EventName, handler: F) -> Subscription
    where
        F: Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.on(event, handler);
        Subscription {
            registry: Arc::downgrade(&self.inner),
            event,
            id: Some(id),
        }
    }

    pub fn handler_count(&self, event: EventName) -> usize {
        self.inner
            .handlers
            .get(&event)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Runs every handler registered for the event's name. Handler errors and
    /// panics are logged and never reach the caller. Returns how many
    /// handlers succeeded.
    pub(crate) fn emit(&self, event: &PushEvent) -> usize {
        let name = event.name();
        let snapshot: Vec<(HandlerId, Handler)> = match self.inner.handlers.get(&name) {
            Some(list) => list.clone(),
            None => {
                tracing::trace!(event = %name, "no handlers registered");
                return 0;
            }
        };

        let mut delivered = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!(event = %name, handler = id.0, "handler failed: {:#}", e);
                }
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    tracing::error!(event = %name, handler = id.0, "handler panicked: {}", msg);
                }
            }
        }
        delivered
    }
}

/// Disposer returned by [`EventDispatcher::subscribe`].
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    registry: Weak<Registry>,
    event: EventName,
    id: Option<HandlerId>,
}

impl Subscription {
    pub fn event(&self) -> EventName {
        self.event
    }

    /// Unregisters now. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let (Some(id), Some(inner)) = (self.id.take(), self.registry.upgrade()) else {
            return;
        };
        EventDispatcher { inner }.off(self.event, Some(id));
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationEvent, NotificationKind};
    use std::sync::atomic::AtomicUsize;

    fn lead() -> PushEvent {
        PushEvent::Notification {
            name: EventName::NewLead,
            event: NotificationEvent::new(NotificationKind::NewLead, "New lead", "Jane Doe"),
        }
    }

    fn counter(dispatcher: &EventDispatcher, event: EventName) -> (HandlerId, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = dispatcher.on(event, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (id, hits)
    }

    #[test]
    fn test_fan_out_to_all_handlers() {
        let d = EventDispatcher::new();
        let (_, a) = counter(&d, EventName::NewLead);
        let (_, b) = counter(&d, EventName::NewLead);
        let (_, other) = counter(&d, EventName::NewMeeting);

        assert_eq!(d.emit(&lead()), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_handler_does_not_stop_siblings() {
        let d = EventDispatcher::new();
        d.on(EventName::NewLead, |_| anyhow::bail!("boom"));
        d.on(EventName::NewLead, |_| panic!("handler exploded"));
        let (_, hits) = counter(&d, EventName::NewLead);

        assert_eq!(d.emit(&lead()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_specific_handler() {
        let d = EventDispatcher::new();
        let (id, removed) = counter(&d, EventName::NewLead);
        let (_, kept) = counter(&d, EventName::NewLead);

        d.off(EventName::NewLead, Some(id));
        d.emit(&lead());

        assert_eq!(removed.load(Ordering::SeqCst), 0);
        assert_eq!(kept.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_without_handler_clears_event() {
        let d = EventDispatcher::new();
        counter(&d, EventName::NewLead);
        counter(&d, EventName::NewLead);
        d.off(EventName::NewLead, None);
        assert_eq!(d.handler_count(EventName::NewLead), 0);
        assert_eq!(d.emit(&lead()), 0);
    }

    #[test]
    fn test_off_unknown_is_noop() {
        let d = EventDispatcher::new();
        let (id, _) = counter(&d, EventName::NewMeeting);
        d.off(EventName::NewLead, Some(id));
        d.off(EventName::NewLead, None);
        d.off(EventName::NewMeeting, Some(id));
        d.off(EventName::NewMeeting, Some(id));
        assert_eq!(d.handler_count(EventName::NewMeeting), 0);
    }

    #[test]
    fn test_subscription_drop_unregisters() {
        let d = EventDispatcher::new();
        let sub = d.subscribe(EventName::NewLead, |_| Ok(()));
        assert_eq!(d.handler_count(EventName::NewLead), 1);
        drop(sub);
        assert_eq!(d.handler_count(EventName::NewLead), 0);
    }

    #[test]
    fn test_subscription_outlives_dispatcher() {
        let d = EventDispatcher::new();
        let sub = d.subscribe(EventName::NewLead, |_| Ok(()));
        drop(d);
        sub.unsubscribe();
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let d = EventDispatcher::new();
        let inner = d.clone();
        let added = Arc::new(AtomicUsize::new(0));
        let added2 = added.clone();
        d.on(EventName::NewLead, move |_| {
            inner.on(EventName::NewLead, |_| Ok(()));
            added2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // Newly added handler does not run in the emission that added it.
        assert_eq!(d.emit(&lead()), 1);
        assert_eq!(d.handler_count(EventName::NewLead), 2);
        assert_eq!(added.load(Ordering::SeqCst), 1);
    }
}
