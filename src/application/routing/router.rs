//! Command router - matches prefixed commands and dispatches them to handlers

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::application::errors::{BotError, TransportError};
use crate::domain::entities::{ArgGrammar, BindingId, IncomingMessage, MessageRef};
use crate::domain::traits::Transport;
use super::grammar::tokenize;

/// Future returned by a command handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), BotError>> + Send>>;

/// Handler function type
pub type Handler = Arc<dyn Fn(CommandContext) -> HandlerFuture + Send + Sync>;

/// Who registered a binding.
///
/// Only the name of a module is kept here; the router never keeps a module alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingOwner {
    Core,
    Module(String),
}

impl BindingOwner {
    pub fn module(name: impl Into<String>) -> Self {
        BindingOwner::Module(name.into())
    }
}

/// Everything a handler gets for one invocation
#[derive(Clone)]
pub struct CommandContext {
    pub message: IncomingMessage,
    pub command: String,
    pub args: Vec<String>,
    pub prefix: String,
    pub transport: Arc<dyn Transport>,
}

impl CommandContext {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Answer the triggering message.
    ///
    /// Our own messages are edited in place; anything else gets a new
    /// message in the same chat.
    pub async fn respond(&self, text: &str) -> Result<MessageRef, TransportError> {
        if self.message.outgoing {
            self.transport
                .edit_message(&self.message.chat_id, &self.message.id, text)
                .await?;
            Ok(self.message.reference())
        } else {
            self.transport.send_message(&self.message.chat_id, text).await
        }
    }

    /// Edit a message produced earlier by `respond`
    pub async fn update(&self, target: &MessageRef, text: &str) -> Result<(), TransportError> {
        self.transport
            .edit_message(&target.chat_id, &target.message_id, text)
            .await
    }
}

/// A registered command
pub struct CommandBinding {
    pub id: BindingId,
    pub command: String,
    pub grammar: ArgGrammar,
    pub owner: BindingOwner,
    handler: Handler,
}

impl std::fmt::Debug for CommandBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBinding")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("grammar", &self.grammar)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Outcome of routing one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No binding matched; the message is not a command
    NoMatch,
    /// A binding matched but the sender is not the owner
    Denied,
    /// The handler ran to completion
    Handled(BindingId),
    /// The handler failed; the error was logged and reported to the chat
    Failed(BindingId),
}

/// Routes prefixed commands to their handlers, owner only
pub struct CommandRouter {
    prefix: String,
    owner_id: String,
    transport: Arc<dyn Transport>,
    bindings: RwLock<Vec<CommandBinding>>,
    next_id: AtomicU64,
}

impl CommandRouter {
    pub fn new(
        prefix: impl Into<String>,
        owner_id: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            owner_id: owner_id.into(),
            transport,
            bindings: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<CommandBinding>> {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<CommandBinding>> {
        self.bindings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a command handler. Bindings are tried in registration order.
    pub fn register(
        &self,
        command: impl Into<String>,
        grammar: ArgGrammar,
        handler: Handler,
        owner: BindingOwner,
    ) -> BindingId {
        let id = BindingId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let command = command.into();
        tracing::debug!(%id, command = %command, ?owner, "registered binding");
        self.write().push(CommandBinding {
            id,
            command,
            grammar,
            owner,
            handler,
        });
        id
    }

    /// Remove every binding registered by `owner`, returning how many were removed
    pub fn unregister_all(&self, owner: &BindingOwner) -> usize {
        let mut bindings = self.write();
        let before = bindings.len();
        bindings.retain(|b| &b.owner != owner);
        before - bindings.len()
    }

    /// Remove specific bindings, returning how many were removed
    pub fn unregister(&self, ids: &[BindingId]) -> usize {
        let mut bindings = self.write();
        let before = bindings.len();
        bindings.retain(|b| !ids.contains(&b.id));
        before - bindings.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, owner: &BindingOwner) -> usize {
        self.read().iter().filter(|b| &b.owner == owner).count()
    }

    /// `(command, grammar)` of every binding owned by `owner`, in registration order
    pub fn commands_for(&self, owner: &BindingOwner) -> Vec<(String, ArgGrammar)> {
        self.read()
            .iter()
            .filter(|b| &b.owner == owner)
            .map(|b| (b.command.clone(), b.grammar))
            .collect()
    }

    /// Find the first binding matching `text`, with its captured arguments
    pub fn resolve(&self, text: &str) -> Option<(BindingId, String, Vec<String>, Handler)> {
        let line = tokenize(&self.prefix, text)?;
        self.read().iter().find_map(|b| {
            if b.command != line.command {
                return None;
            }
            b.grammar
                .capture(line.rest)
                .map(|args| (b.id, b.command.clone(), args, b.handler.clone()))
        })
    }

    pub fn is_owner(&self, message: &IncomingMessage) -> bool {
        message.sender_id() == Some(self.owner_id.as_str())
    }

    /// Route one message: match, check the owner, run the handler
    pub async fn dispatch(&self, message: IncomingMessage) -> Dispatch {
        let Some((id, command, args, handler)) = self.resolve(&message.text) else {
            return Dispatch::NoMatch;
        };

        if !self.is_owner(&message) {
            tracing::debug!(
                command = %command,
                sender = ?message.sender_id(),
                "ignoring command from non-owner"
            );
            if self.transport.supports_deletion() {
                if let Err(e) = self.transport.delete_message(&message.chat_id, &message.id).await {
                    tracing::debug!("could not delete non-owner command: {}", e);
                }
            }
            return Dispatch::Denied;
        }

        let ctx = CommandContext {
            message,
            command: command.clone(),
            args,
            prefix: self.prefix.clone(),
            transport: self.transport.clone(),
        };

        match handler(ctx.clone()).await {
            Ok(()) => Dispatch::Handled(id),
            Err(e) => {
                tracing::error!(command = %command, binding = %id, "command failed: {}", e);
                if let Err(send_err) = ctx.respond(&format!("❌ {}", e)).await {
                    tracing::warn!("failed to report command error: {}", send_err);
                }
                Dispatch::Failed(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::CommandError;
    use crate::domain::entities::User;
    use crate::infrastructure::adapters::memory::MemoryTransport;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_ctx| -> HandlerFuture {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BotError>(())
            })
        })
    }

    fn replying(text: &'static str) -> Handler {
        Arc::new(move |ctx: CommandContext| -> HandlerFuture {
            Box::pin(async move {
                ctx.respond(text).await?;
                Ok::<(), BotError>(())
            })
        })
    }

    fn router(prefix: &str) -> (Arc<MemoryTransport>, CommandRouter) {
        let transport = Arc::new(MemoryTransport::new("owner"));
        let router = CommandRouter::new(prefix, "owner", transport.clone());
        (transport, router)
    }

    fn from(sender: &str, text: &str) -> IncomingMessage {
        IncomingMessage::new("chat", text).with_sender(User::new(sender))
    }

    #[tokio::test]
    async fn test_first_matching_binding_wins() {
        let (_transport, router) = router(".");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let id =
            router.register("ping", ArgGrammar::None, counting(first.clone()), BindingOwner::Core);
        router.register("ping", ArgGrammar::None, counting(second.clone()), BindingOwner::Core);

        assert_eq!(router.dispatch(from("owner", ".ping")).await, Dispatch::Handled(id));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grammar_selects_binding() {
        let (_transport, router) = router(".");
        let hits = Arc::new(AtomicUsize::new(0));
        router.register("cfg", ArgGrammar::Word, counting(hits.clone()), BindingOwner::Core);

        assert_eq!(router.dispatch(from("owner", ".cfg")).await, Dispatch::NoMatch);
        assert_eq!(router.dispatch(from("owner", ".cfg a b")).await, Dispatch::NoMatch);
        assert!(matches!(
            router.dispatch(from("owner", ".cfg prefix")).await,
            Dispatch::Handled(_)
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_owner_is_silently_deleted() {
        let (transport, router) = router(".");
        let hits = Arc::new(AtomicUsize::new(0));
        router.register("restart", ArgGrammar::None, counting(hits.clone()), BindingOwner::Core);

        let message = from("stranger", ".restart");
        let message_id = message.id.clone();
        assert_eq!(router.dispatch(message).await, Dispatch::Denied);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(transport.sent().is_empty());
        assert!(transport.edits().is_empty());
        assert_eq!(transport.deleted(), vec![MessageRef::new("chat", message_id)]);
    }

    #[tokio::test]
    async fn test_non_owner_without_deletion_support() {
        let transport = Arc::new(MemoryTransport::new("owner").without_deletion());
        let router = CommandRouter::new(".", "owner", transport.clone());
        router.register("ping", ArgGrammar::None, replying("pong"), BindingOwner::Core);

        assert_eq!(router.dispatch(from("stranger", ".ping")).await, Dispatch::Denied);
        assert!(transport.deleted().is_empty());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_plain_text_from_non_owner_is_untouched() {
        let (transport, router) = router(".");
        router.register("ping", ArgGrammar::None, replying("pong"), BindingOwner::Core);

        assert_eq!(router.dispatch(from("stranger", "hello")).await, Dispatch::NoMatch);
        assert!(transport.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_outgoing_messages_are_edited() {
        let (transport, router) = router(".");
        router.register("ping", ArgGrammar::None, replying("pong"), BindingOwner::Core);

        let message = from("owner", ".ping").outgoing();
        let id = message.id.clone();
        router.dispatch(message).await;

        assert!(transport.sent().is_empty());
        assert_eq!(transport.edits(), vec![(MessageRef::new("chat", id), "pong".to_string())]);
    }

    #[tokio::test]
    async fn test_handler_error_is_reported() {
        let (transport, router) = router(".");
        let failing: Handler = Arc::new(|_ctx| -> HandlerFuture {
            Box::pin(async {
                Err::<(), BotError>(CommandError::ExecutionFailed("boom".into()).into())
            })
        });
        let id = router.register("fail", ArgGrammar::None, failing, BindingOwner::Core);

        assert_eq!(router.dispatch(from("owner", ".fail")).await, Dispatch::Failed(id));
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("boom"));
    }

    #[tokio::test]
    async fn test_metacharacter_prefix_is_literal() {
        let (_transport, router) = router("$.");
        let hits = Arc::new(AtomicUsize::new(0));
        router.register("ping", ArgGrammar::None, counting(hits.clone()), BindingOwner::Core);

        assert_eq!(router.dispatch(from("owner", "a.ping")).await, Dispatch::NoMatch);
        assert!(matches!(router.dispatch(from("owner", "$.ping")).await, Dispatch::Handled(_)));
    }

    #[test]
    fn test_unregister_all_only_touches_owner() {
        let (_transport, router) = router(".");
        router.register("help", ArgGrammar::None, replying("x"), BindingOwner::Core);
        router.register("echo", ArgGrammar::Rest, replying("x"), BindingOwner::module("echo"));
        router.register("shout", ArgGrammar::Rest, replying("x"), BindingOwner::module("echo"));
        router.register("note", ArgGrammar::Rest, replying("x"), BindingOwner::module("notes"));

        assert_eq!(router.unregister_all(&BindingOwner::module("echo")), 2);
        assert_eq!(router.len(), 2);
        assert_eq!(router.count_for(&BindingOwner::module("notes")), 1);
        assert_eq!(router.unregister_all(&BindingOwner::module("echo")), 0);
    }
}
