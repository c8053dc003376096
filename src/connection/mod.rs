//! Transport connection: one logical push session per user.
//!
//! - `connect` performs the handshake (bounded by `connect_timeout`), sends
//!   `join`, and hands the session to a supervisor task.
//! - The supervisor decodes inbound frames and dispatches them, and on an
//!   abnormal or server-initiated drop runs the linear reconnection policy.
//! - `disconnect` is idempotent. Once it returns no further event is
//!   dispatched, and handlers stay registered for the next `connect`.

mod state;

pub use state::ConnectionState;

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::dispatcher::{EventDispatcher, HandlerId, Subscription};
use crate::errors::{NotifyError, Result};
use crate::models::Identity;
use crate::protocol::{decode_frame, ClientMessage, EventName, PushEvent};
use crate::transport::{
    Connector, DisconnectReason, Inbound, NegotiatingConnector, Session, TransportKind,
};
use state::InternalState;

thread_local! {
    /// Set while this thread is inside a dispatch, so a handler that calls
    /// `disconnect` does not wait on its own emission.
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Self {
        DISPATCHING.with(|d| d.set(true));
        DispatchGuard
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(false));
    }
}

/// Outbound side of the current session. Survives reconnects; sends while
/// no session is up fail with [`NotifyError::NotConnected`].
#[derive(Default)]
pub struct Outbox {
    slot: Mutex<Option<mpsc::Sender<ClientMessage>>>,
}

impl Outbox {
    fn install(&self, sender: mpsc::Sender<ClientMessage>) {
        *self.slot.lock() = Some(sender);
    }

    fn clear(&self) {
        self.slot.lock().take();
    }

    /// Queues `msg` without waiting. A full queue drops the message.
    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        let sender = self.slot.lock().clone().ok_or(NotifyError::NotConnected)?;
        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => Err(NotifyError::Transport(format!(
                "outbound queue full, dropped '{}'",
                msg.kind()
            ))),
            Err(TrySendError::Closed(_)) => Err(NotifyError::NotConnected),
        }
    }
}

/// Best-effort read receipts. Failures are logged and otherwise ignored.
pub trait ReceiptSink: Send + Sync {
    fn send_read_receipt(&self, notification_id: &str);
}

impl ReceiptSink for Outbox {
    fn send_read_receipt(&self, notification_id: &str) {
        let msg = ClientMessage::MarkAsRead {
            notification_id: notification_id.to_string(),
        };
        if let Err(e) = self.send(msg) {
            debug!(notification_id, error = %e, "read receipt not sent");
        }
    }
}

struct Inner {
    base_url: String,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    dispatcher: EventDispatcher,
    state: RwLock<InternalState>,
    outbox: Arc<Outbox>,
    identity: Mutex<Option<Identity>>,
    transport: Mutex<Option<TransportKind>>,
    /// Bumped by every connect/disconnect; tasks from older generations
    /// stop dispatching.
    generation: AtomicU64,
    gate: Mutex<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

pub struct NotificationConnection {
    inner: Arc<Inner>,
}

impl NotificationConnection {
    /// Connection using streaming transport with long-polling fallback.
    pub fn new(base_url: impl Into<String>, config: ConnectionConfig) -> Self {
        Self::with_connector(base_url, config, Arc::new(NegotiatingConnector::default()))
    }

    pub fn with_connector(
        base_url: impl Into<String>,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_dispatcher(base_url, config, connector, EventDispatcher::new())
    }

    pub fn with_dispatcher(
        base_url: impl Into<String>,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into(),
                config,
                connector,
                dispatcher,
                state: RwLock::new(InternalState::default()),
                outbox: Arc::new(Outbox::default()),
                identity: Mutex::new(None),
                transport: Mutex::new(None),
                generation: AtomicU64::new(0),
                gate: Mutex::new(()),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Opens the session and joins as `identity`.
    ///
    /// # Errors
    ///
    /// Fails if the handshake errors or does not complete within the
    /// configured timeout. The reconnection policy keeps trying in the
    /// background either way.
    pub async fn connect(&self, identity: Identity) -> Result<()> {
        self.inner.teardown();
        let gen = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.identity.lock() = Some(identity.clone());
        self.inner.state.write().mark_connecting();

        info!(
            user_id = %identity.user_id,
            url = %self.inner.base_url,
            "connecting to push server"
        );

        match self.inner.open().await {
            Ok(session) => {
                if !self.inner.install(&session, gen) {
                    return Err(NotifyError::connection("disconnected during handshake"));
                }
                // The supervisor owns the session before any handler runs, so
                // a `disconnect` from a `Connected` handler can abort it.
                self.spawn_supervisor(gen, Some(session));
                self.inner.dispatch(gen, &PushEvent::Connected);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "push connection failed");
                if self.inner.is_current(gen) {
                    self.inner.state.write().mark_disconnected();
                    self.spawn_supervisor(gen, None);
                }
                Err(e)
            }
        }
    }

    /// Closes the session. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let was_open = !matches!(
            self.state(),
            ConnectionState::Closed | ConnectionState::Disconnected
        );
        self.inner.teardown();
        self.inner.state.write().mark_closed();
        if was_open {
            info!(url = %self.inner.base_url, "disconnected from push server");
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.read().state.is_connected()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.read().state
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.read().reconnect_attempts
    }

    /// When the last inbound frame arrived, across reconnects.
    #[must_use]
    pub fn last_message_at(&self) -> Option<Instant> {
        self.inner.state.read().last_message
    }

    /// Transport of the current session, if any.
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        *self.inner.transport.lock()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.lock().clone()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn on<F>(&self, event: EventName, handler: F) -> HandlerId
    where
        F: Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(event, handler)
    }

    pub fn off(&self, event: EventName, handler: Option<HandlerId>) {
        self.inner.dispatcher.off(event, handler)
    }

    pub fn subscribe<F>(&self, event: EventName, handler: F) -> Subscription
    where
        F: Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(event, handler)
    }

    pub fn outbox(&self) -> Arc<Outbox> {
        self.inner.outbox.clone()
    }

    /// Typing indicator passthrough for chat views sharing the connection.
    pub fn send_typing(&self, data: serde_json::Value) -> Result<()> {
        self.inner.outbox.send(ClientMessage::Typing(data))
    }

    fn spawn_supervisor(&self, gen: u64, session: Option<Session>) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(supervise(inner, gen, session));
        let abort = handle.abort_handle();
        if let Some(old) = self.inner.supervisor.lock().replace(handle) {
            old.abort();
        }
        // A teardown that ran before the handle was stored could not see it.
        if !self.inner.is_current(gen) {
            abort.abort();
        }
    }
}

impl Drop for NotificationConnection {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    fn is_current(&self, gen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == gen
    }

    /// Invalidates the running generation and stops its tasks. When this
    /// returns no handler of that generation is running, unless the caller
    /// is itself a handler.
    fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if !DISPATCHING.with(|d| d.get()) {
            drop(self.gate.lock());
        }
        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }
        self.outbox.clear();
        self.transport.lock().take();
    }

    async fn open(&self) -> Result<Session> {
        let limit = self.config.connect_timeout();
        match timeout(limit, self.connector.open(&self.base_url, &self.config)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::ConnectTimeout(limit)),
        }
    }

    /// Marks a fresh session live: resets the attempt counter and queues
    /// `join`. Returns `false`, leaving everything untouched, when `gen` has
    /// been superseded.
    fn install(&self, session: &Session, gen: u64) -> bool {
        let _gate = self.gate.lock();
        if !self.is_current(gen) {
            debug!(transport = %session.kind(), "dropping session opened for a stale generation");
            return false;
        }
        self.outbox.install(session.sender());
        *self.transport.lock() = Some(session.kind());
        self.state.write().mark_connected();

        let identity = self.identity.lock().clone();
        if let Some(identity) = identity {
            if let Err(e) = self.outbox.send(ClientMessage::Join(identity)) {
                warn!(error = %e, "failed to queue join");
            }
        }

        info!(transport = %session.kind(), "connected to push server");
        true
    }

    /// Emits `event` unless `gen` has been superseded. Returns whether the
    /// generation is still live.
    fn dispatch(&self, gen: u64, event: &PushEvent) -> bool {
        let _gate = self.gate.lock();
        if !self.is_current(gen) {
            return false;
        }
        let _guard = DispatchGuard::enter();
        self.dispatcher.emit(event);
        true
    }

    /// Reads frames until the session ends.
    async fn pump(&self, session: &mut Session, gen: u64) -> DisconnectReason {
        loop {
            match session.recv().await {
                Inbound::Frame(text) => {
                    self.state.write().record_message();
                    match decode_frame(&text) {
                        Ok(event) => {
                            debug!(event = %event.name(), "push event received");
                            if !self.dispatch(gen, &event) {
                                return DisconnectReason::ClientInitiated;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable push frame"),
                    }
                }
                Inbound::Closed(reason) => return reason,
            }
        }
    }

    /// Runs the linear backoff policy. Returns a live session, or `None`
    /// when attempts are exhausted or the generation was superseded.
    async fn reconnect(&self, gen: u64) -> Option<Session> {
        loop {
            let attempts_made = self.state.read().reconnect_attempts;
            if !self.config.should_reconnect(attempts_made) {
                error!(
                    attempts = attempts_made,
                    "max reconnection attempts reached"
                );
                if self.is_current(gen) {
                    self.state.write().mark_disconnected();
                }
                self.dispatch(
                    gen,
                    &PushEvent::MaxReconnectAttemptsReached {
                        attempts: attempts_made,
                    },
                );
                return None;
            }

            let attempt = self.state.write().mark_reconnecting();
            let delay = self.config.reconnect_delay(attempt);
            info!(
                attempt,
                max_attempts = self.config.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "attempting to reconnect"
            );
            tokio::time::sleep(delay).await;

            if !self.is_current(gen) {
                return None;
            }

            match self.open().await {
                Ok(session) => {
                    if !self.install(&session, gen) {
                        return None;
                    }
                    if !self.dispatch(gen, &PushEvent::Connected) {
                        return None;
                    }
                    return Some(session);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnection attempt failed");
                }
            }
        }
    }
}

async fn supervise(inner: Arc<Inner>, gen: u64, mut session: Option<Session>) {
    loop {
        if let Some(mut live) = session.take() {
            let reason = inner.pump(&mut live, gen).await;
            drop(live);

            if !inner.is_current(gen) {
                return;
            }
            inner.outbox.clear();
            inner.transport.lock().take();
            inner.state.write().mark_disconnected();
            warn!(reason = %reason, "push session lost");

            if !reason.should_reconnect() {
                return;
            }
            inner.dispatch(
                gen,
                &PushEvent::Disconnected {
                    reason: reason.to_string(),
                },
            );
        }

        match inner.reconnect(gen).await {
            Some(next) => session = Some(next),
            None => return,
        }
    }
}
