use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the hub on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
    Critical,
}

impl NotificationKind {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Success,
            Self::Error,
            Self::Warning,
            Self::Info,
            Self::Critical,
        ]
    }

    /// How long a consumer should keep the message on screen. `None` means it
    /// stays until the user acts on it.
    pub const fn auto_dismiss_after(self) -> Option<Duration> {
        match self {
            Self::Success => Some(Duration::from_secs(5)),
            Self::Info => Some(Duration::from_secs(7)),
            Self::Warning => Some(Duration::from_secs(10)),
            Self::Error => Some(Duration::from_secs(15)),
            Self::Critical => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Critical => "critical",
        }
    }
}

/// Ordering is meaningful: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl NotificationPriority {
    pub const fn ordered() -> [Self; 4] {
        [Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

pub type NotificationMetadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: NotificationMetadata,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub dismissed: bool,
}

impl Notification {
    pub fn is_active(&self) -> bool {
        !self.dismissed
    }
}

/// Input for `NotificationHub::create`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: NotificationMetadata,
}

impl NewNotification {
    pub fn new(
        kind: NotificationKind,
        priority: NotificationPriority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            priority,
            title: title.into(),
            message: message.into(),
            metadata: NotificationMetadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Query used by `NotificationHub::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    pub priority: Option<NotificationPriority>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub include_dismissed: bool,
}

impl NotificationFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        if notification.dismissed && !self.include_dismissed {
            return false;
        }
        if self.unread_only && notification.read {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != notification.kind) {
            return false;
        }
        self.priority
            .map_or(true, |priority| priority == notification.priority)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSort {
    #[default]
    Newest,
    Oldest,
    /// Highest priority first, newest first within a priority.
    Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationStats {
    pub total: usize,
    pub unread: usize,
    pub by_kind: BTreeMap<NotificationKind, usize>,
    pub by_priority: BTreeMap<NotificationPriority, usize>,
    pub recent_count: usize,
}

impl Default for NotificationStats {
    fn default() -> Self {
        Self {
            total: 0,
            unread: 0,
            by_kind: NotificationKind::ordered()
                .into_iter()
                .map(|kind| (kind, 0))
                .collect(),
            by_priority: NotificationPriority::ordered()
                .into_iter()
                .map(|priority| (priority, 0))
                .collect(),
            recent_count: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification {0} not found")]
    NotFound(NotificationId),
}
