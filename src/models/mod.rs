pub mod identity;
pub mod notification;

pub use identity::{Identity, UserType};
pub use notification::{Notification, NotificationEvent, NotificationKind};
