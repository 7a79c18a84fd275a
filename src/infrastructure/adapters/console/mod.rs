//! Console adapter for development/testing
//!
//! Every stdin line is a message typed by the account the runtime is logged
//! in as, so replies edit it in place. Edits are printed with the id of the
//! message they replace.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::application::errors::TransportError;
use crate::domain::entities::{IncomingMessage, MessageRef, User};
use crate::domain::traits::Transport;

const CONSOLE_ID: &str = "console";

pub struct ConsoleTransport {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    next_id: AtomicU64,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn start(&self) -> Result<(), TransportError> {
        tracing::info!("Starting console transport (dev mode)");
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<MessageRef, TransportError> {
        let id = self.next_id();
        println!("[BOT #{}] {}", id, text);
        Ok(MessageRef::new(chat_id, id))
    }

    async fn edit_message(
        &self,
        _chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        println!("[BOT #{} edited] {}", message_id, text);
        Ok(())
    }

    async fn delete_message(&self, _chat_id: &str, message_id: &str) -> Result<(), TransportError> {
        println!("[BOT #{} deleted]", message_id);
        Ok(())
    }

    async fn send_file(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
    ) -> Result<MessageRef, TransportError> {
        let id = self.next_id();
        println!("[BOT #{}] {}\n[file] {}", id, caption, path.display());
        Ok(MessageRef::new(chat_id, id))
    }

    async fn download_attachment(
        &self,
        _message: &IncomingMessage,
        _dest_dir: &Path,
    ) -> Result<PathBuf, TransportError> {
        Err(TransportError::Unsupported("attachments on the console"))
    }

    async fn self_identity(&self) -> Result<String, TransportError> {
        Ok(CONSOLE_ID.to_string())
    }

    async fn next_message(&self) -> Result<Option<IncomingMessage>, TransportError> {
        loop {
            let Some(line) = self.lines.lock().await.next_line().await? else {
                return Ok(None);
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            return Ok(Some(
                IncomingMessage::new(CONSOLE_ID, text)
                    .with_id(self.next_id())
                    .with_sender(User::new(CONSOLE_ID).with_username(CONSOLE_ID))
                    .with_platform(CONSOLE_ID)
                    .outgoing(),
            ));
        }
    }

    fn name(&self) -> &str {
        CONSOLE_ID
    }
}
