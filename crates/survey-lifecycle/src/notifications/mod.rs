//! Bounded, prioritized store of user-facing messages.

pub mod domain;
mod hub;
pub mod router;
pub mod store;

pub use domain::{
    NewNotification, Notification, NotificationError, NotificationFilter, NotificationId,
    NotificationKind, NotificationMetadata, NotificationPriority, NotificationSort,
    NotificationStats,
};
pub use hub::{NotificationHub, DEFAULT_MAX_NOTIFICATIONS};
pub use router::notification_router;
pub use store::{JsonFileStore, MemoryStore, NotificationStore, StoreError};
