use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Notification, NotificationId, NotificationKind, NotificationMetadata, NotificationPriority,
};

/// Persistence hook for the active notification set.
///
/// `save` runs synchronously on the thread that mutated the hub, so
/// implementations should stay cheap; the hub never holds its list lock while
/// saving. `load` returns entries in the order they were saved, newest first.
pub trait NotificationStore: Send + Sync {
    fn load(&self) -> Result<Vec<Notification>, StoreError>;
    fn save(&self, notifications: &[Notification]) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("notification store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("notification snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk shape of one entry, keyed by id in the snapshot map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PersistedNotification {
    #[serde(rename = "type")]
    kind: NotificationKind,
    priority: NotificationPriority,
    title: String,
    message: String,
    #[serde(default)]
    metadata: NotificationMetadata,
    timestamp: DateTime<Utc>,
    read: bool,
    dismissed: bool,
    /// Index in the saved list, 0 being the newest. Absent in older snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
}

type Snapshot = BTreeMap<NotificationId, PersistedNotification>;

fn to_snapshot(notifications: &[Notification]) -> Snapshot {
    notifications
        .iter()
        .enumerate()
        .map(|(position, notification)| {
            (
                notification.id.clone(),
                PersistedNotification {
                    kind: notification.kind,
                    priority: notification.priority,
                    title: notification.title.clone(),
                    message: notification.message.clone(),
                    metadata: notification.metadata.clone(),
                    timestamp: notification.created_at,
                    read: notification.read,
                    dismissed: notification.dismissed,
                    position: Some(position),
                },
            )
        })
        .collect()
}

fn from_snapshot(snapshot: Snapshot) -> Vec<Notification> {
    let mut positioned: Vec<(Option<usize>, Notification)> = snapshot
        .into_iter()
        .map(|(id, entry)| {
            (
                entry.position,
                Notification {
                    id,
                    kind: entry.kind,
                    priority: entry.priority,
                    title: entry.title,
                    message: entry.message,
                    metadata: entry.metadata,
                    created_at: entry.timestamp,
                    read: entry.read,
                    dismissed: entry.dismissed,
                },
            )
        })
        .collect();
    // Saved order first; entries without a position fall back to newest first.
    positioned.sort_by_key(|(position, notification)| {
        (position.is_none(), *position, Reverse(notification.created_at))
    });
    positioned
        .into_iter()
        .map(|(_, notification)| notification)
        .collect()
}

/// JSON file store. Writes go to a sibling temp file first and are renamed
/// into place so a crash never leaves a truncated snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Notification>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read(&self.path)?;
        let snapshot: Snapshot = serde_json::from_slice(&contents)?;
        Ok(from_snapshot(snapshot))
    }

    fn save(&self, notifications: &[Notification]) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(&to_snapshot(notifications))?;
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Store that keeps the serialized snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Raw JSON of the last successful save.
    pub fn raw(&self) -> Option<String> {
        self.snapshot.lock().expect("store mutex poisoned").clone()
    }
}

impl NotificationStore for MemoryStore {
    fn load(&self) -> Result<Vec<Notification>, StoreError> {
        match self.snapshot.lock().expect("store mutex poisoned").as_deref() {
            Some(raw) => Ok(from_snapshot(serde_json::from_str(raw)?)),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, notifications: &[Notification]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&to_snapshot(notifications))?;
        *self.snapshot.lock().expect("store mutex poisoned") = Some(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn notification(id: &str, minute: u32) -> Notification {
        Notification {
            id: NotificationId(id.to_string()),
            kind: NotificationKind::Warning,
            priority: NotificationPriority::High,
            title: format!("title {id}"),
            message: "Encuesta próxima a vencer".to_string(),
            metadata: NotificationMetadata::from([(
                "record_id".to_string(),
                serde_json::Value::from("s-1"),
            )]),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, minute, 0).unwrap(),
            read: false,
            dismissed: minute % 2 == 0,
        }
    }

    #[test]
    fn file_store_round_trips_and_orders_newest_first() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = JsonFileStore::new(dir.path().join("state").join("notifications.json"));

        assert!(store.load().expect("missing file loads empty").is_empty());

        store
            .save(&[notification("a", 9), notification("b", 5)])
            .expect("save succeeds");
        let loaded = store.load().expect("load succeeds");

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id.0, "a");
        assert_eq!(loaded[1].id.0, "b");
        assert!(!loaded[1].dismissed);
        assert_eq!(loaded[0].metadata["record_id"], "s-1");
    }

    #[test]
    fn snapshot_is_keyed_by_id_with_type_field() {
        let store = MemoryStore::default();
        store.save(&[notification("n-1", 4)]).expect("save succeeds");

        let raw: serde_json::Value =
            serde_json::from_str(&store.raw().expect("snapshot written")).expect("valid json");
        let entry = &raw["n-1"];
        assert_eq!(entry["type"], "warning");
        assert_eq!(entry["priority"], "high");
        assert_eq!(entry["dismissed"], true);
        assert!(entry["timestamp"].is_string());
    }

    #[test]
    fn equal_timestamps_restore_in_saved_order() {
        let store = MemoryStore::default();
        let saved = vec![
            notification("c-newest", 3),
            notification("a-middle", 3),
            notification("b-oldest", 3),
        ];
        store.save(&saved).expect("save succeeds");

        let ids: Vec<_> = store
            .load()
            .expect("load succeeds")
            .into_iter()
            .map(|entry| entry.id.0)
            .collect();
        assert_eq!(ids, vec!["c-newest", "a-middle", "b-oldest"]);
    }

    #[test]
    fn snapshots_without_positions_fall_back_to_timestamps() {
        let store = MemoryStore::default();
        *store.snapshot.lock().expect("store mutex poisoned") = Some(
            r#"{
                "old": {"type": "info", "priority": "low", "title": "t", "message": "m",
                        "timestamp": "2024-03-01T08:00:00Z", "read": false, "dismissed": false},
                "new": {"type": "info", "priority": "low", "title": "t", "message": "m",
                        "timestamp": "2024-03-01T09:00:00Z", "read": false, "dismissed": false}
            }"#
            .to_string(),
        );

        let loaded = store.load().expect("legacy snapshot loads");
        assert_eq!(loaded[0].id.0, "new");
        assert_eq!(loaded[1].id.0, "old");
    }

    #[test]
    fn corrupt_file_surfaces_json_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("notifications.json");
        std::fs::write(&path, b"{not json").expect("write fixture");

        match JsonFileStore::new(&path).load() {
            Err(StoreError::Json(_)) => {}
            other => panic!("expected json error, got {other:?}"),
        }
    }
}
