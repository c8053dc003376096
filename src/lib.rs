//! estate-notify: real-time notification delivery for the agent dashboard.
//!
//! A [`connection::NotificationConnection`] keeps one push session per user
//! and fans decoded events out through an [`dispatcher::EventDispatcher`];
//! a [`store::NotificationStore`] turns them into the read/unread list the
//! UI renders. [`session::NotificationSession`] wires the two together.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod models;
pub mod presentation;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;

pub use connection::{ConnectionState, NotificationConnection};
pub use dispatcher::{EventDispatcher, Subscription};
pub use errors::NotifyError;
pub use models::{Identity, Notification, NotificationEvent, NotificationKind, UserType};
pub use protocol::{EventName, PushEvent};
pub use session::NotificationSession;
pub use store::{NotificationStore, StoreSnapshot};
