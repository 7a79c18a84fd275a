//! End-to-end module lifecycle through the in-memory transport

#![cfg(unix)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use hotplug_bot::application::routing::Dispatch;
use hotplug_bot::application::services::ShutdownReason;
use hotplug_bot::domain::entities::{Attachment, IncomingMessage, MessageRef, RestartKind, User};
use hotplug_bot::infrastructure::adapters::MemoryTransport;
use hotplug_bot::infrastructure::config::Config;
use hotplug_bot::App;

const ECHO: &str = r#"# version: 1.2
# author: tester
# description: Repeats text
while IFS= read -r line; do
  case "$line" in
    *'"type":"load"'*)
      printf '%s\n' '{"type":"loaded","commands":[{"name":"echo","args":"rest",'\
'"description":"Echo text"}]}' ;;
    *'"type":"invoke"'*)
      arg=$(printf '%s' "$line" | sed 's/.*"args":\["\([^"]*\)".*/\1/')
      printf '{"type":"actions","actions":[{"action":"reply","text":"%s"}]}\n' "$arg" ;;
    *'"type":"unload"'*)
      printf '%s\n' '{"type":"unloaded"}' ;;
  esac
done
"#;

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.bot.root = root.to_path_buf();
    config.plugins.interpreters = BTreeMap::from([("sh".to_string(), vec!["sh".to_string()])]);
    config.plugins.load_timeout_secs = 5;
    config
}

fn from_owner(text: &str) -> IncomingMessage {
    IncomingMessage::new("chat", text).with_sender(User::new("owner"))
}

async fn boot(root: &Path) -> (Arc<MemoryTransport>, Arc<App>) {
    let transport = Arc::new(MemoryTransport::new("owner"));
    let app = App::bootstrap(config(root), transport.clone()).await.unwrap();
    (transport, app)
}

#[tokio::test]
async fn test_upload_dispatch_and_unload() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, app) = boot(dir.path()).await;
    app.start().await;

    let attachment = Attachment::new("file-1").with_file_name("echo.sh");
    transport.add_attachment(&attachment, ECHO);
    let upload = IncomingMessage::new("chat", "").with_attachment(attachment);

    let lm = from_owner(".lm").with_reply_to(upload);
    assert!(matches!(app.router.dispatch(lm).await, Dispatch::Handled(_)));
    assert!(dir.path().join("mods").join("echo.sh").exists());
    assert!(transport.edits()[0].1.contains("📦 Name: echo"));
    assert_eq!(app.modules.names(), vec!["echo"]);

    transport.clear();
    assert!(matches!(app.router.dispatch(from_owner(".echo hello")).await, Dispatch::Handled(_)));
    assert_eq!(transport.sent()[0].1, "hello");

    transport.clear();
    app.router.dispatch(from_owner(".mlist")).await;
    assert!(transport.sent()[0].1.contains("🔹 echo v1.2"));

    transport.clear();
    app.router.dispatch(from_owner(".ulm echo")).await;
    assert_eq!(transport.sent()[0].1, "✅ Module echo unloaded");
    assert_eq!(app.router.dispatch(from_owner(".echo hello")).await, Dispatch::NoMatch);
}

#[tokio::test]
async fn test_unsupported_upload_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, app) = boot(dir.path()).await;

    let lm = upload("file-2", "notes.txt", "hello", &transport);

    assert!(matches!(app.router.dispatch(lm).await, Dispatch::Failed(_)));
    assert!(!dir.path().join("mods").join("notes.txt").exists());
    assert!(app.modules.names().is_empty());
}

fn upload(
    file_id: &str,
    file_name: &str,
    body: &str,
    transport: &MemoryTransport,
) -> IncomingMessage {
    let attachment = Attachment::new(file_id).with_file_name(file_name);
    transport.add_attachment(&attachment, body);
    let upload = IncomingMessage::new("chat", "").with_attachment(attachment);
    from_owner(".lm").with_reply_to(upload)
}

#[tokio::test]
async fn test_upload_outside_mods_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, app) = boot(dir.path()).await;

    let lm = upload("file-3", "../x.sh", ECHO, &transport);
    assert!(matches!(app.router.dispatch(lm).await, Dispatch::Failed(_)));
    assert!(!dir.path().join("x.sh").exists());
    assert!(!dir.path().join("mods").join("x.sh").exists());
    assert!(app.modules.names().is_empty());
}

#[tokio::test]
async fn test_upload_with_invalid_module_name_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, app) = boot(dir.path()).await;

    let lm = upload("file-4", "my-mod.sh", ECHO, &transport);
    assert!(matches!(app.router.dispatch(lm).await, Dispatch::Failed(_)));
    assert!(!dir.path().join("mods").join("my-mod.sh").exists());
    assert!(app.modules.names().is_empty());
}

#[tokio::test]
async fn test_loaded_module_file_is_sent_back() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("mods")).unwrap();
    std::fs::write(dir.path().join("mods").join("echo.sh"), ECHO).unwrap();
    let (transport, app) = boot(dir.path()).await;
    app.start().await;

    assert!(matches!(app.router.dispatch(from_owner(".gm echo")).await, Dispatch::Handled(_)));
    let documents = transport.documents();
    assert_eq!(documents.len(), 1);
    assert!(documents[0].1.ends_with("echo.sh"));
    assert!(documents[0].2.contains("📦 Module echo v1.2"));
    assert!(documents[0].2.contains("• .echo"));

    assert!(matches!(app.router.dispatch(from_owner(".gm other")).await, Dispatch::Failed(_)));
    assert_eq!(transport.documents().len(), 1);
}

#[tokio::test]
async fn test_search_without_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_transport, app) = boot(dir.path()).await;

    let result = app.router.dispatch(from_owner(".mfind weather")).await;
    assert!(matches!(result, Dispatch::Failed(_)));
}

#[tokio::test]
async fn test_non_owner_command_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, app) = boot(dir.path()).await;

    let message = IncomingMessage::new("chat", ".help")
        .with_id("42")
        .with_sender(User::new("intruder"));
    assert_eq!(app.router.dispatch(message).await, Dispatch::Denied);
    assert_eq!(transport.deleted(), vec![MessageRef::new("chat", "42")]);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_prefix_change_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("mods")).unwrap();
    std::fs::write(dir.path().join("mods").join("echo.sh"), ECHO).unwrap();

    let (transport, app) = boot(dir.path()).await;
    let summary = app.start().await;
    assert_eq!(summary.loaded, vec!["echo"]);

    transport.push_incoming(from_owner(".cfg prefix !"));
    let reason = app.run().await.unwrap();
    assert_eq!(reason, Some(ShutdownReason::Restart(RestartKind::PrefixChange)));
    assert!(app.modules.names().is_empty());

    let (progress, text) = transport.sent()[0].clone();
    assert!(text.contains("Prefix changed to: !"));

    let (transport, app) = boot(dir.path()).await;
    assert_eq!(app.router.prefix(), "!");
    let summary = app.start().await;
    assert_eq!(summary.loaded, vec!["echo"]);

    let edits = transport.edits();
    assert_eq!(edits[0].0, progress);
    assert!(edits[0].1.contains("Prefix changed to: !"));

    assert!(matches!(app.router.dispatch(from_owner("!echo again")).await, Dispatch::Handled(_)));
    assert_eq!(app.router.dispatch(from_owner(".echo again")).await, Dispatch::NoMatch);
}
