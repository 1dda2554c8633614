//! Mailbox IPC (C8): per-task inboxes plus a shared broadcast channel,
//! layered on the same atomic-file primitives as [`crate::signals`].
//!
//! Layout: `<root>/.orchestrator/mailbox/{<task-id>|broadcast}/msg-<ts>-<uuid>.json[.read]`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StateError;

/// One delivered message. Wire shape is `{ id, from, to, type, body,
/// timestamp, data? }` (spec.md 6; `examples/original_source/.claude/orchestrator_code/mailbox.py`
/// `_make_message`) — this is the cross-agent IPC contract, not an
/// internal detail, so the field names on the wire are load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id (also embedded in the filename).
    pub id: Uuid,
    /// The task id that sent it (`"supervisor"` for supervisor-originated
    /// messages).
    pub from: String,
    /// The recipient task id, or `"broadcast"` for broadcast messages.
    pub to: String,
    /// Message kind (`"info"`, `"api_change"`, ... — opaque to the
    /// mailbox itself).
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Human-readable message text.
    pub body: String,
    /// When it was sent.
    pub timestamp: DateTime<Utc>,
    /// Optional structured payload accompanying `body`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

/// Handle onto the mailbox directory tree for one orchestration root.
pub struct Mailbox {
    root: PathBuf,
}

const BROADCAST_DIR: &str = "broadcast";

impl Mailbox {
    /// `<root>/.orchestrator/mailbox`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self { root: root.join(".orchestrator").join("mailbox") }
    }

    fn inbox_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    fn broadcast_dir(&self) -> PathBuf {
        self.root.join(BROADCAST_DIR)
    }

    fn seen_marker_path(&self, task_id: &str) -> PathBuf {
        self.broadcast_dir().join(format!(".seen-by-{task_id}"))
    }

    async fn write_message(dir: &Path, message: &Message) -> Result<(), StateError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StateError::Io { path: dir.display().to_string(), source })?;

        let filename = format!(
            "msg-{:020}-{}.json",
            message.timestamp.timestamp_nanos_opt().unwrap_or_default(),
            message.id
        );
        let target = dir.join(filename);
        let tmp = dir.join(format!("{}.tmp", target.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned())));

        let body = serde_json::to_vec_pretty(message).map_err(|source| StateError::Corrupt {
            path: target.display().to_string(),
            attempts: 0,
            source,
        })?;
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|source| StateError::Io { path: tmp.display().to_string(), source })?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|source| StateError::Io { path: target.display().to_string(), source })?;
        Ok(())
    }

    /// Deliver a message of kind `msg_type` with text `body` (and optional
    /// structured `data`) to `recipient`'s personal inbox.
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] or [`StateError::Corrupt`] on serialization
    /// failure.
    pub async fn send(
        &self,
        sender: &str,
        recipient: &str,
        msg_type: &str,
        body: &str,
        data: Option<Value>,
    ) -> Result<Uuid, StateError> {
        let message = Message {
            id: Uuid::new_v4(),
            from: sender.to_string(),
            to: recipient.to_string(),
            msg_type: msg_type.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            data,
        };
        Self::write_message(&self.inbox_dir(recipient), &message).await?;
        Ok(message.id)
    }

    /// Broadcast a message of kind `msg_type` with text `body` (and
    /// optional structured `data`) to every reader. Self-delivery is
    /// suppressed at read time, not at send time (spec.md 4.8:
    /// "self-broadcasts are suppressed"), so a sender's own dedup marker
    /// still advances.
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] or [`StateError::Corrupt`].
    pub async fn broadcast(
        &self,
        sender: &str,
        msg_type: &str,
        body: &str,
        data: Option<Value>,
    ) -> Result<Uuid, StateError> {
        let message = Message {
            id: Uuid::new_v4(),
            from: sender.to_string(),
            to: BROADCAST_DIR.to_string(),
            msg_type: msg_type.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            data,
        };
        Self::write_message(&self.broadcast_dir(), &message).await?;
        Ok(message.id)
    }

    /// Read and consume every unread personal message for `task_id`, in
    /// delivery order, renaming each `.json -> .read.json` atomically as
    /// it is returned.
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] if the inbox can't be listed.
    pub async fn drain_inbox(&self, task_id: &str) -> Result<Vec<Message>, StateError> {
        let dir = self.inbox_dir(task_id);
        let mut names = Self::list_unread_json(&dir).await?;
        names.sort();

        let mut messages = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(&name);
            let Ok(text) = tokio::fs::read_to_string(&path).await else { continue };
            let Ok(message) = serde_json::from_str::<Message>(&text) else {
                tracing::warn!(path = %path.display(), "skipping corrupt mailbox message");
                continue;
            };
            let read_path = path.with_extension("read.json");
            let _ = tokio::fs::rename(&path, &read_path).await;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Read every broadcast `task_id` has not yet seen, excluding its own,
    /// and record them in its `.seen-by-<task_id>` marker.
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] if the broadcast directory can't be listed.
    pub async fn poll_broadcasts(&self, task_id: &str) -> Result<Vec<Message>, StateError> {
        let dir = self.broadcast_dir();
        let mut names = Self::list_unread_json(&dir).await?;
        names.sort();

        let seen_path = self.seen_marker_path(task_id);
        let seen_text = tokio::fs::read_to_string(&seen_path).await.unwrap_or_default();
        let mut seen: std::collections::HashSet<String> =
            seen_text.lines().map(ToString::to_string).collect();

        let mut messages = Vec::new();
        let mut newly_seen = Vec::new();
        for name in names {
            let path = dir.join(&name);
            let Ok(text) = tokio::fs::read_to_string(&path).await else { continue };
            let Ok(message) = serde_json::from_str::<Message>(&text) else {
                tracing::warn!(path = %path.display(), "skipping corrupt broadcast message");
                continue;
            };
            let id_str = message.id.to_string();
            if seen.contains(&id_str) {
                continue;
            }
            newly_seen.push(id_str.clone());
            seen.insert(id_str);
            if message.from == task_id {
                continue;
            }
            messages.push(message);
        }

        if !newly_seen.is_empty() {
            let mut appended = seen_text;
            if !appended.is_empty() && !appended.ends_with('\n') {
                appended.push('\n');
            }
            for id in &newly_seen {
                appended.push_str(id);
                appended.push('\n');
            }
            let tmp = seen_path.with_extension("tmp");
            if tokio::fs::write(&tmp, &appended).await.is_ok() {
                let _ = tokio::fs::rename(&tmp, &seen_path).await;
            }
        }

        Ok(messages)
    }

    async fn list_unread_json(dir: &Path) -> Result<Vec<String>, StateError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StateError::Io { path: dir.display().to_string(), source }),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StateError::Io { path: dir.display().to_string(), source })?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("msg-") && name.ends_with(".json") && !name.ends_with(".read.json") {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn personal_message_is_delivered_once() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let mailbox = Mailbox::new(dir.path());
        mailbox.send("supervisor", "a", "info", "wake up", None).await.unwrap_or_else(|e| panic!("{e}"));

        let first = mailbox.drain_inbox("a").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].to, "a");
        let second = mailbox.drain_inbox("a").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn broadcast_suppresses_self_and_dedupes() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let mailbox = Mailbox::new(dir.path());
        mailbox
            .broadcast("a", "api_change", "contract updated", Some(json!({"file": "src/api.py"})))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        mailbox.broadcast("b", "api_change", "contract updated", None).await.unwrap_or_else(|e| panic!("{e}"));

        let for_a = mailbox.poll_broadcasts("a").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].from, "b");

        let for_a_again = mailbox.poll_broadcasts("a").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(for_a_again.is_empty());
    }

    #[tokio::test]
    async fn inbox_messages_are_returned_in_delivery_order() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let mailbox = Mailbox::new(dir.path());
        mailbox.send("supervisor", "a", "info", "first", None).await.unwrap_or_else(|e| panic!("{e}"));
        mailbox.send("supervisor", "a", "info", "second", None).await.unwrap_or_else(|e| panic!("{e}"));

        let messages = mailbox.drain_inbox("a").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].timestamp <= messages[1].timestamp);
    }
}
