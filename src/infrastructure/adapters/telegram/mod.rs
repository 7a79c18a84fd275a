//! Telegram adapter

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, OnceCell};

use crate::application::errors::TransportError;
use crate::domain::entities::{Attachment, IncomingMessage, MessageRef};
use crate::domain::traits::Transport;

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

/// Long-poll duration for getUpdates, in seconds
const POLL_TIMEOUT: i64 = 30;

/// Telegram update type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub document: Option<Document>,
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// Longest caption the Bot API accepts, in characters
const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Deserialize)]
struct Sent {
    message_id: i64,
}

/// Envelope every Bot API method answers with
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

fn api_error(code: Option<i64>, description: String) -> TransportError {
    let lower = description.to_lowercase();
    if code == Some(401) {
        TransportError::Auth(description)
    } else if lower.contains("not found") {
        TransportError::NotFound(description)
    } else {
        TransportError::Api(description)
    }
}

fn parse_id(id: &str) -> Result<i64, TransportError> {
    id.parse()
        .map_err(|_| TransportError::Parse(format!("not a Telegram id: {}", id)))
}

/// Convert a Bot API message; `me` is the bot's own user id
fn to_incoming(message: Message, me: &str) -> IncomingMessage {
    let text = message.text.or(message.caption).unwrap_or_default();
    let mut incoming = IncomingMessage::new(message.chat.id.to_string(), text)
        .with_id(message.message_id.to_string())
        .with_platform("telegram");

    if let Some(from) = message.from {
        let id = from.id.to_string();
        incoming.outgoing = id == me;
        let mut user = crate::domain::entities::User::new(id);
        user.is_bot = from.is_bot;
        if let Some(username) = from.username {
            user = user.with_username(username);
        }
        if let Some(first_name) = from.first_name {
            user = user.with_first_name(first_name);
        }
        incoming = incoming.with_sender(user);
    }

    if let Some(doc) = message.document {
        let mut attachment = Attachment::new(doc.file_id);
        attachment.size = doc.file_size;
        if let Some(name) = doc.file_name {
            attachment = attachment.with_file_name(name);
        }
        incoming = incoming.with_attachment(attachment);
    }

    if let Some(reply) = message.reply_to_message {
        incoming = incoming.with_reply_to(to_incoming(*reply, me));
    }

    incoming
}

/// Telegram Bot API transport, long-polling getUpdates
pub struct TelegramTransport {
    token: String,
    client: Client,
    me: OnceCell<String>,
    offset: AtomicI64,
    pending: Mutex<VecDeque<IncomingMessage>>,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: Client::new(),
            me: OnceCell::new(),
            offset: AtomicI64::new(0),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Get the API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", API_BASE, self.token, file_path)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::read_response(method, response).await
    }

    async fn read_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let data: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))?;

        match data {
            ApiResponse { ok: true, result: Some(result), .. } => Ok(result),
            ApiResponse { description, error_code, .. } => Err(api_error(
                error_code,
                description.unwrap_or_else(|| format!("{} failed", method)),
            )),
        }
    }

    async fn me(&self) -> Result<&str, TransportError> {
        #[derive(Deserialize)]
        struct Me {
            id: i64,
        }

        let id = self
            .me
            .get_or_try_init(|| async {
                let me: Me = self.call("getMe", &serde_json::json!({})).await?;
                Ok::<String, TransportError>(me.id.to_string())
            })
            .await?;
        Ok(id.as_str())
    }

    /// Get updates from Telegram using getUpdates API
    async fn get_updates(&self) -> Result<Vec<Update>, TransportError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest {
            offset: i64,
            timeout: i64,
            allowed_updates: Vec<&'static str>,
        }

        let request = GetUpdatesRequest {
            offset: self.offset.load(Ordering::SeqCst),
            timeout: POLL_TIMEOUT,
            allowed_updates: vec!["message"],
        };
        self.call("getUpdates", &request).await
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let me = self.me().await?;
        tracing::info!("Starting Telegram transport as bot {}", me);
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<MessageRef, TransportError> {
        tracing::debug!("Sending to {}: {}", chat_id, text);
        let sent: Sent = self
            .call(
                "sendMessage",
                &serde_json::json!({ "chat_id": parse_id(chat_id)?, "text": text }),
            )
            .await?;
        Ok(MessageRef::new(chat_id, sent.message_id.to_string()))
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "chat_id": parse_id(chat_id)?,
            "message_id": parse_id(message_id)?,
            "text": text,
        });
        match self.call::<_, serde_json::Value>("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(TransportError::Api(e)) if e.contains("message is not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "chat_id": parse_id(chat_id)?,
            "message_id": parse_id(message_id)?,
        });
        self.call::<_, bool>("deleteMessage", &body).await?;
        Ok(())
    }

    async fn download_attachment(
        &self,
        message: &IncomingMessage,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransportError> {
        #[derive(Deserialize)]
        struct File {
            file_path: Option<String>,
        }

        let attachment = message.attachment.as_ref().ok_or_else(|| {
            TransportError::NotFound(format!("no attachment on message {}", message.id))
        })?;

        let file: File = self
            .call("getFile", &serde_json::json!({ "file_id": attachment.file_id }))
            .await?;
        let remote = file
            .file_path
            .ok_or_else(|| TransportError::Api("file is too big to download".to_string()))?;

        let bytes = self
            .client
            .get(self.file_url(&remote))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::Network(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let file_name = match &attachment.file_name {
            Some(_) => attachment.local_name(),
            None => Path::new(&remote)
                .file_name()
                .and_then(|n| n.to_str())
                .map_or_else(|| attachment.local_name(), str::to_string),
        };

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(file_name);
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }

    async fn send_file(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef, TransportError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("module")
            .to_string();
        let caption: String = caption.chars().take(MAX_CAPTION_CHARS).collect();

        let form = Form::new()
            .text("chat_id", parse_id(chat_id)?.to_string())
            .text("caption", caption)
            .part("document", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let sent: Sent = Self::read_response("sendDocument", response).await?;
        Ok(MessageRef::new(chat_id, sent.message_id.to_string()))
    }

    async fn self_identity(&self) -> Result<String, TransportError> {
        Ok(self.me().await?.to_string())
    }

    async fn next_message(&self) -> Result<Option<IncomingMessage>, TransportError> {
        let me = self.me().await?.to_string();
        let mut pending = self.pending.lock().await;
        loop {
            if let Some(message) = pending.pop_front() {
                return Ok(Some(message));
            }

            let updates = match self.get_updates().await {
                Ok(updates) => updates,
                Err(TransportError::Network(e)) => {
                    tracing::warn!("getUpdates failed, retrying: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for update in updates {
                self.offset.fetch_max(update.update_id + 1, Ordering::SeqCst);
                if let Some(message) = update.message {
                    pending.push_back(to_incoming(message, &me));
                }
            }
        }
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_conversion() {
        let json = r#"{
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 42, "username": "owner"},
                "chat": {"id": -100},
                "caption": ".lm",
                "reply_to_message": {
                    "message_id": 4,
                    "from": {"id": 7, "is_bot": true},
                    "chat": {"id": -100},
                    "document": {"file_id": "abc", "file_name": "echo.py", "file_size": 12}
                }
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        let message = to_incoming(update.message.unwrap(), "7");

        assert_eq!(message.id, "5");
        assert_eq!(message.chat_id, "-100");
        assert_eq!(message.text, ".lm");
        assert_eq!(message.sender_id(), Some("42"));
        assert!(!message.outgoing);

        let reply = message.reply_to.unwrap();
        assert!(reply.outgoing);
        let attachment = reply.attachment.unwrap();
        assert_eq!(attachment.file_name.as_deref(), Some("echo.py"));
        assert_eq!(attachment.size, Some(12));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            api_error(Some(400), "Bad Request: message to edit not found".into()),
            TransportError::NotFound(_)
        ));
        assert!(matches!(api_error(Some(401), "Unauthorized".into()), TransportError::Auth(_)));
        assert!(matches!(api_error(Some(400), "Bad Request".into()), TransportError::Api(_)));
        assert!(matches!(parse_id("abc"), Err(TransportError::Parse(_))));
    }
}
