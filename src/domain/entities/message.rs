use super::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A file attached to a message, downloadable through the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_id: String,
    pub file_name: Option<String>,
    pub size: Option<u64>,
}

impl Attachment {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: None,
            size: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Name to store the file under locally: the last component of the sent
    /// name, falling back to the file id. Never contains a directory.
    pub fn local_name(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file_id)
            .to_string()
    }
}

/// Address of a message that already exists on the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: String,
    pub message_id: String,
}

impl MessageRef {
    pub fn new(chat_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
        }
    }
}

/// A message received from the transport
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub chat_id: String,
    pub sender: Option<User>,
    pub text: String,
    /// Sent by the account the transport is logged in as. Replies to such
    /// messages edit them in place instead of posting a new message.
    pub outgoing: bool,
    pub reply_to: Option<Box<IncomingMessage>>,
    pub attachment: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
    pub platform: String,
}

impl IncomingMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            chat_id: chat_id.into(),
            sender: None,
            text: text.into(),
            outgoing: false,
            reply_to: None,
            attachment: None,
            timestamp: Utc::now(),
            platform: "unknown".to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sender(mut self, user: User) -> Self {
        self.sender = Some(user);
        self
    }

    pub fn with_reply_to(mut self, message: IncomingMessage) -> Self {
        self.reply_to = Some(Box::new(message));
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn outgoing(mut self) -> Self {
        self.outgoing = true;
        self
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender.as_ref().map(|u| u.id.as_str())
    }

    pub fn reference(&self) -> MessageRef {
        MessageRef::new(&self.chat_id, &self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name_strips_directories() {
        let attachment = Attachment::new("f1").with_file_name("../../escape.sh");
        assert_eq!(attachment.local_name(), "escape.sh");

        let attachment = Attachment::new("f1").with_file_name("..");
        assert_eq!(attachment.local_name(), "f1");
        assert_eq!(Attachment::new("f2").local_name(), "f2");
    }
}
