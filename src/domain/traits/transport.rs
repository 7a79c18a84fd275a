use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::application::errors::TransportError;
use crate::domain::entities::{IncomingMessage, MessageRef};

/// Transport trait - abstraction for the chat client the runtime sits on
///
/// Handlers never talk to a concrete client; everything goes through this
/// narrow surface so adapters can be swapped without touching the core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and authenticate. Failure here is fatal at startup.
    async fn start(&self) -> Result<(), TransportError>;

    /// Send a new message to a chat
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<MessageRef, TransportError>;

    /// Replace the text of an existing message.
    ///
    /// Returns `TransportError::NotFound` when the message no longer exists.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), TransportError>;

    /// Delete a message
    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), TransportError>;

    /// Send a local file as a document, with `caption` as its text
    async fn send_file(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef, TransportError>;

    /// Download the attachment of `message` into `dest_dir`, returning the written path
    async fn download_attachment(
        &self,
        message: &IncomingMessage,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransportError>;

    /// Identity of the logged-in account
    async fn self_identity(&self) -> Result<String, TransportError>;

    /// Wait for the next incoming message. `None` means the transport disconnected.
    async fn next_message(&self) -> Result<Option<IncomingMessage>, TransportError>;

    /// Whether `delete_message` can succeed for messages sent by others
    fn supports_deletion(&self) -> bool {
        true
    }

    /// Short adapter name for logs
    fn name(&self) -> &str;
}
