use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::MessageRef;

/// Why the process is being re-executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartKind {
    Normal,
    Update,
    #[serde(rename = "prefix")]
    PrefixChange,
}

impl RestartKind {
    /// Text shown while the restart is in progress
    pub fn progress_text(&self, extra: &BTreeMap<String, String>) -> String {
        match self {
            RestartKind::Normal => {
                "🔄 Restarting...\n⏳ This takes a few seconds".to_string()
            }
            RestartKind::Update => {
                "🔄 Applying update...\n⏳ This takes a few seconds".to_string()
            }
            RestartKind::PrefixChange => format!(
                "✅ Prefix changed to: {}\n🔄 Restarting to apply it...",
                extra.get("new_prefix").map(String::as_str).unwrap_or("N/A")
            ),
        }
    }
}

/// Record persisted right before a re-exec and replayed on the next boot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartStatus {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: RestartKind,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default, rename = "msg_id")]
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

fn default_kind() -> RestartKind {
    RestartKind::Normal
}

impl RestartStatus {
    pub fn new(kind: RestartKind, target: Option<MessageRef>) -> Self {
        let (chat_id, message_id) = match target {
            Some(r) => (Some(r.chat_id), Some(r.message_id)),
            None => (None, None),
        };
        Self {
            kind,
            chat_id,
            message_id,
            timestamp: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn target(&self) -> Option<MessageRef> {
        match (&self.chat_id, &self.message_id) {
            (Some(chat), Some(msg)) => Some(MessageRef::new(chat, msg)),
            _ => None,
        }
    }

    fn extra_or(&self, key: &str, fallback: &'static str) -> &str {
        self.extra.get(key).map(String::as_str).unwrap_or(fallback)
    }

    /// Text confirming that the restart finished
    pub fn confirmation_text(&self) -> String {
        let at = self
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S");
        match self.kind {
            RestartKind::Normal => {
                format!("🟢 Restarted successfully and running!\n🕒 Restart time: {at}")
            }
            RestartKind::Update => format!(
                "🎉 Updated successfully!\n\nNew version: {}\n\n🕒 Restart time: {at}",
                self.extra_or("new_version", "unknown")
            ),
            RestartKind::PrefixChange => format!(
                "✅ Prefix changed to: {}\n🕒 Restart time: {at}",
                self.extra_or("new_prefix", "N/A")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let status = RestartStatus::new(
            RestartKind::PrefixChange,
            Some(MessageRef::new("42", "7")),
        )
        .with_extra("new_prefix", "!");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "prefix");
        assert_eq!(json["chat_id"], "42");
        assert_eq!(json["msg_id"], "7");
        assert_eq!(json["new_prefix"], "!");

        let back: RestartStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_confirmation_uses_kind_template() {
        let status =
            RestartStatus::new(RestartKind::PrefixChange, None).with_extra("new_prefix", "!");
        assert!(status.confirmation_text().contains("Prefix changed to: !"));

        let status = RestartStatus::new(RestartKind::Update, None);
        assert!(status.confirmation_text().contains("New version: unknown"));
        assert!(status.target().is_none());
    }
}
