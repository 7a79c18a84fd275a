//! In-memory transport
//!
//! Incoming messages are queued with [`MemoryTransport::push_incoming`] and
//! everything the runtime does to the chat is captured for inspection. Used
//! by the test suites and handy for driving the runtime without a network.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::application::errors::TransportError;
use crate::domain::entities::{Attachment, IncomingMessage, MessageRef};
use crate::domain::traits::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MemoryTransport {
    self_id: String,
    deletion: bool,
    inbound: Mutex<VecDeque<IncomingMessage>>,
    sent: Mutex<Vec<(MessageRef, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    documents: Mutex<Vec<(MessageRef, PathBuf, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    missing: Mutex<HashSet<MessageRef>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
}

impl MemoryTransport {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            deletion: true,
            inbound: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            documents: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            missing: Mutex::new(HashSet::new()),
            files: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Behave like a transport that cannot delete other people's messages
    pub fn without_deletion(mut self) -> Self {
        self.deletion = false;
        self
    }

    pub fn push_incoming(&self, message: IncomingMessage) {
        lock(&self.inbound).push_back(message);
    }

    /// Make `contents` downloadable as the attachment with this file id
    pub fn add_attachment(&self, attachment: &Attachment, contents: impl Into<Vec<u8>>) {
        lock(&self.files).insert(attachment.file_id.clone(), contents.into());
    }

    /// Make later edits of this message fail as if it had been deleted
    pub fn forget_message(&self, message: &MessageRef) {
        lock(&self.missing).insert(message.clone());
    }

    /// Messages sent so far, with the reference each one was given
    pub fn sent(&self) -> Vec<(MessageRef, String)> {
        lock(&self.sent).clone()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        lock(&self.edits).clone()
    }

    /// Files sent with `send_file`: reference, path and caption
    pub fn documents(&self) -> Vec<(MessageRef, PathBuf, String)> {
        lock(&self.documents).clone()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        lock(&self.deleted).clone()
    }

    /// Every text the transport showed, sends and edits in order of arrival per kind
    pub fn texts(&self) -> Vec<String> {
        let mut texts: Vec<String> = self.sent().into_iter().map(|(_, t)| t).collect();
        texts.extend(self.edits().into_iter().map(|(_, t)| t));
        texts
    }

    fn next_reference(&self, chat_id: &str) -> MessageRef {
        MessageRef::new(chat_id, format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
        lock(&self.edits).clear();
        lock(&self.documents).clear();
        lock(&self.deleted).clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<MessageRef, TransportError> {
        let reference = self.next_reference(chat_id);
        lock(&self.sent).push((reference.clone(), text.to_string()));
        Ok(reference)
    }

    async fn send_file(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef, TransportError> {
        tokio::fs::metadata(path).await?;
        let reference = self.next_reference(chat_id);
        lock(&self.documents).push((reference.clone(), path.to_path_buf(), caption.to_string()));
        Ok(reference)
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let reference = MessageRef::new(chat_id, message_id);
        if lock(&self.missing).contains(&reference) {
            return Err(TransportError::NotFound(format!("{}/{}", chat_id, message_id)));
        }
        lock(&self.edits).push((reference, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), TransportError> {
        if !self.deletion {
            return Err(TransportError::Unsupported("delete_message"));
        }
        let reference = MessageRef::new(chat_id, message_id);
        lock(&self.missing).insert(reference.clone());
        lock(&self.deleted).push(reference);
        Ok(())
    }

    async fn download_attachment(
        &self,
        message: &IncomingMessage,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransportError> {
        let attachment = message.attachment.as_ref().ok_or_else(|| {
            TransportError::NotFound(format!("no attachment on message {}", message.id))
        })?;
        let contents = lock(&self.files)
            .get(&attachment.file_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("file {}", attachment.file_id)))?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(attachment.local_name());
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    async fn self_identity(&self) -> Result<String, TransportError> {
        Ok(self.self_id.clone())
    }

    async fn next_message(&self) -> Result<Option<IncomingMessage>, TransportError> {
        Ok(lock(&self.inbound).pop_front())
    }

    fn supports_deletion(&self) -> bool {
        self.deletion
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_drains_then_disconnects() {
        let transport = MemoryTransport::new("me");
        transport.push_incoming(IncomingMessage::new("c", "one"));
        assert_eq!(transport.next_message().await.unwrap().unwrap().text, "one");
        assert!(transport.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edit_after_delete_is_not_found() {
        let transport = MemoryTransport::new("me");
        let sent = transport.send_message("c", "hello").await.unwrap();
        transport.delete_message(&sent.chat_id, &sent.message_id).await.unwrap();

        let result = transport.edit_message(&sent.chat_id, &sent.message_id, "again").await;
        assert!(matches!(result, Err(TransportError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_download_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MemoryTransport::new("me");
        let attachment = Attachment::new("f1").with_file_name("echo.sh");
        transport.add_attachment(&attachment, "echo");

        let message = IncomingMessage::new("c", "").with_attachment(attachment);
        let path = transport.download_attachment(&message, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("echo.sh"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "echo");
    }

    #[tokio::test]
    async fn test_download_keeps_only_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("mods");
        let transport = MemoryTransport::new("me");
        let attachment = Attachment::new("f1").with_file_name("../outside.sh");
        transport.add_attachment(&attachment, "echo");

        let message = IncomingMessage::new("c", "").with_attachment(attachment);
        let path = transport.download_attachment(&message, &dest).await.unwrap();
        assert_eq!(path, dest.join("outside.sh"));
        assert!(!dir.path().join("outside.sh").exists());
    }

    #[tokio::test]
    async fn test_send_file_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.sh");
        let transport = MemoryTransport::new("me");
        assert!(transport.send_file("c", &path, "caption").await.is_err());

        std::fs::write(&path, "echo").unwrap();
        transport.send_file("c", &path, "caption").await.unwrap();
        assert_eq!(transport.documents()[0].1, path);
    }
}
