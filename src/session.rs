//! Per-user binding of a connection and a store.
//!
//! This is what a UI holds for the lifetime of a signed-in view. Creating it
//! wires the store into the dispatcher; dropping it disconnects and removes
//! those handlers. Changing identity always disconnects before reconnecting.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::connection::{ConnectionState, NotificationConnection};
use crate::dispatcher::Subscription;
use crate::errors::Result;
use crate::models::{Identity, Notification};
use crate::protocol::EventName;
use crate::store::{NotificationStore, StoreSnapshot};
use crate::transport::{Connector, NegotiatingConnector};

pub struct NotificationSession {
    connection: NotificationConnection,
    store: NotificationStore,
    identity: Identity,
    _subscriptions: Vec<Subscription>,
}

impl NotificationSession {
    /// Builds a session without connecting yet.
    pub fn new(config: &Config, identity: Identity, connector: Arc<dyn Connector>) -> Self {
        let connection = NotificationConnection::with_connector(
            config.api_url.clone(),
            config.connection.clone(),
            connector,
        );
        let store = NotificationStore::with_receipts(config.store.clone(), connection.outbox());

        let subscriptions = EventName::NOTIFICATIONS
            .iter()
            .map(|&name| {
                let store = store.clone();
                connection.subscribe(name, move |event| store.handle_event(event))
            })
            .collect();

        Self {
            connection,
            store,
            identity,
            _subscriptions: subscriptions,
        }
    }

    /// Builds a session on the default transports and connects it.
    pub async fn open(config: &Config, identity: Identity) -> Self {
        let session = Self::new(config, identity, Arc::new(NegotiatingConnector::default()));
        session.start().await;
        session
    }

    /// Connects as the current identity. Failures only show up through
    /// [`is_connected`](Self::is_connected); reconnection continues in the
    /// background.
    pub async fn start(&self) {
        if let Err(e) = self.try_start().await {
            error!(user_id = %self.identity.user_id, "failed to connect to notification service: {}", e);
        }
    }

    /// Like [`start`](Self::start) but surfaces the handshake error.
    pub async fn try_start(&self) -> Result<()> {
        self.connection.connect(self.identity.clone()).await
    }

    /// Rebinds to `identity`: disconnect, then connect. No-op for the same
    /// identity.
    pub async fn switch_identity(&mut self, identity: Identity) {
        if identity == self.identity {
            return;
        }
        info!(
            from = %self.identity.user_id,
            to = %identity.user_id,
            "switching notification identity"
        );
        self.connection.disconnect();
        self.identity = identity;
        self.start().await;
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.store.notifications()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    pub fn mark_as_read(&self, id: &str) {
        self.store.mark_as_read(id)
    }

    pub fn mark_all_as_read(&self) {
        self.store.mark_all_as_read()
    }

    pub fn clear_notification(&self, id: &str) {
        self.store.clear_notification(id)
    }

    pub fn clear_all_notifications(&self) {
        self.store.clear_all_notifications()
    }

    /// Marks `id` read if it is unread; read entries are left alone.
    pub fn activate(&self, id: &str) {
        if matches!(self.store.get(id), Some(n) if !n.read) {
            self.store.mark_as_read(id);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    pub fn connection(&self) -> &NotificationConnection {
        &self.connection
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}
