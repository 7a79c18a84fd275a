//! Built-in commands: module management, restart, settings and diagnostics

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::application::app::App;
use crate::application::errors::{BotError, CommandError, RepositoryError, StorageError};
use crate::application::routing::{BindingOwner, CommandContext, Handler, HandlerFuture};
use crate::domain::entities::module::is_valid_module_name;
use crate::domain::entities::{ArgGrammar, LoadOrigin, ModuleDescriptor, RestartKind};

/// Name, grammar and help text of every core command, in registration order
pub const CORE_COMMANDS: &[(&str, ArgGrammar, &str)] = &[
    ("help", ArgGrammar::None, "Show this help"),
    ("ping", ArgGrammar::None, "Check that the bot is alive"),
    ("restart", ArgGrammar::None, "Restart the bot"),
    ("lm", ArgGrammar::None, "Load the module file you replied to"),
    ("ulm", ArgGrammar::Word, "Unload a module"),
    ("rlm", ArgGrammar::Word, "Reload a module from disk"),
    ("mlist", ArgGrammar::None, "List loaded modules"),
    ("mhelp", ArgGrammar::Word, "Show a module's commands"),
    ("gm", ArgGrammar::Word, "Send a loaded module's file"),
    ("mfind", ArgGrammar::Rest, "Search the module repository"),
    ("dlm", ArgGrammar::File, "Download and load a module from the repository"),
    ("cfg", ArgGrammar::OptionalRest, "Show settings, or `prefix <p>` to change it"),
    ("logs", ArgGrammar::OptionalRest, "Show the last lines of the log"),
    ("clean", ArgGrammar::None, "Clear cached copies of unloaded modules"),
];

const DEFAULT_LOG_LINES: usize = 20;
const MAX_LOG_LINES: usize = 200;
const MAX_SEARCH_RESULTS: usize = 20;

/// Bind `f` as a core command. The handler keeps only a weak reference to
/// the runtime.
fn bind<F, Fut>(app: &Arc<App>, command: &str, grammar: ArgGrammar, f: F)
where
    F: Fn(Arc<App>, CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BotError>> + Send + 'static,
{
    let weak = Arc::downgrade(app);
    let f = Arc::new(f);
    let handler: Handler = Arc::new(move |ctx: CommandContext| -> HandlerFuture {
        let weak = weak.clone();
        let f = f.clone();
        Box::pin(async move {
            let app = weak.upgrade().ok_or_else(|| {
                CommandError::Unavailable("the runtime is shutting down".to_string())
            })?;
            f(app, ctx).await
        })
    });
    app.router.register(command, grammar, handler, BindingOwner::Core);
}

pub fn register_core_commands(app: &Arc<App>) {
    bind(app, "help", ArgGrammar::None, help);
    bind(app, "ping", ArgGrammar::None, ping);
    bind(app, "restart", ArgGrammar::None, restart);
    bind(app, "lm", ArgGrammar::None, load_attached);
    bind(app, "ulm", ArgGrammar::Word, unload);
    bind(app, "rlm", ArgGrammar::Word, reload);
    bind(app, "mlist", ArgGrammar::None, module_list);
    bind(app, "mhelp", ArgGrammar::Word, module_help);
    bind(app, "gm", ArgGrammar::Word, send_module);
    bind(app, "mfind", ArgGrammar::Rest, find_modules);
    bind(app, "dlm", ArgGrammar::File, download);
    bind(app, "cfg", ArgGrammar::OptionalRest, settings);
    bind(app, "logs", ArgGrammar::OptionalRest, logs);
    bind(app, "clean", ArgGrammar::None, clean);
    tracing::debug!("Registered {} core commands", CORE_COMMANDS.len());
}

fn required_arg(ctx: &CommandContext) -> Result<String, CommandError> {
    ctx.arg(0).map(str::to_string).ok_or_else(|| {
        CommandError::InvalidArgs(format!("usage: {}{} <name>", ctx.prefix, ctx.command))
    })
}

/// Module name for a file about to be written into the modules directory.
///
/// The file must be a bare `<name>.<ext>`: no directories, a valid module
/// name and a supported extension.
fn module_name_for(app: &App, file_name: &str) -> Result<String, CommandError> {
    let path = Path::new(file_name);
    let bare = path.file_name().and_then(|n| n.to_str()) == Some(file_name);
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    if bare
        && ArgGrammar::File.capture(file_name).is_some()
        && is_valid_module_name(name)
        && app.modules.is_supported(path)
    {
        Ok(name.to_string())
    } else {
        Err(CommandError::InvalidArgs(format!(
            "{:?} is not a supported module file",
            file_name
        )))
    }
}

/// Card shown after a module loads
fn module_card(module: &ModuleDescriptor, prefix: &str) -> String {
    let mut lines = vec![
        "✅ Module loaded!".to_string(),
        String::new(),
        format!("📦 Name: {}", module.name),
        format!("🔖 Version: {}", module.version),
        format!("👤 Author: {}", module.author),
        String::new(),
        "📝 Description:".to_string(),
        module.description.clone(),
    ];
    if !module.commands.is_empty() {
        lines.push(String::new());
        lines.push("⚙️ Commands:".to_string());
        for (command, description) in &module.commands {
            lines.push(format!("• {}{} - {}", prefix, command, description));
        }
    }
    lines.join("\n")
}

async fn help(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let mut lines = vec!["🤖 Commands".to_string(), String::new()];
    for (command, grammar, description) in CORE_COMMANDS {
        lines.push(format!("{}{}{} - {}", ctx.prefix, command, grammar.usage(), description));
    }

    let modules = app.modules.list();
    if !modules.is_empty() {
        lines.push(String::new());
        lines.push(format!("📦 Modules ({})", modules.len()));
        for module in &modules {
            let commands: Vec<String> = module
                .command_names()
                .map(|c| format!("{}{}", ctx.prefix, c))
                .collect();
            lines.push(format!("{}: {}", module.name, commands.join(", ")));
        }
    }

    ctx.respond(&lines.join("\n")).await?;
    Ok(())
}

async fn ping(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let started = Instant::now();
    let message = ctx.respond("🏓 Pong!").await?;
    let latency = started.elapsed().as_secs_f64() * 1000.0;
    ctx.update(
        &message,
        &format!(
            "🏓 Pong! | {:.2}ms | up {} min | {} modules",
            latency,
            app.uptime_minutes(),
            app.modules.list().len()
        ),
    )
    .await?;
    Ok(())
}

async fn restart(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let message = ctx.respond(&RestartKind::Normal.progress_text(&BTreeMap::new())).await?;
    app.restart
        .prepare_restart(RestartKind::Normal, Some(message), BTreeMap::new(), &app.modules)
        .await?;
    Ok(())
}

async fn load_attached(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let reply = ctx
        .message
        .reply_to
        .as_deref()
        .filter(|m| m.attachment.is_some())
        .ok_or_else(|| CommandError::InvalidArgs("reply to a module file".to_string()))?;

    let file_name = reply
        .attachment
        .as_ref()
        .and_then(|a| a.file_name.clone())
        .unwrap_or_default();
    let name = module_name_for(&app, &file_name)?;

    let progress = ctx.respond("⬇️ Downloading module...").await?;
    ctx.transport
        .download_attachment(reply, app.modules.plugin_dir())
        .await?;

    let module = app.modules.load(&name, LoadOrigin::Fresh).await?;
    ctx.update(&progress, &module_card(&module, &ctx.prefix)).await?;
    Ok(())
}

async fn unload(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let name = required_arg(&ctx)?;
    app.modules.unload(&name).await?;
    ctx.respond(&format!("✅ Module {} unloaded", name)).await?;
    Ok(())
}

async fn reload(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let name = required_arg(&ctx)?;
    let module = app.modules.reload(&name).await?;
    ctx.respond(&format!(
        "✅ Module {} reloaded (v{}, load #{})",
        module.name, module.version, module.load_count
    ))
    .await?;
    Ok(())
}

async fn module_list(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let modules = app.modules.list();
    if modules.is_empty() {
        ctx.respond("ℹ️ No modules loaded").await?;
        return Ok(());
    }

    let mut lines = vec![format!("📦 Loaded modules ({})", modules.len()), String::new()];
    for module in &modules {
        let description: String = module.description.chars().take(50).collect();
        lines.extend([
            format!("🔹 {} v{}", module.name, module.version),
            format!("   ├ {}", description),
            format!("   ├ 👤 {}", module.author),
            format!("   ├ 🕒 loaded {} min ago", module.uptime_minutes()),
            format!("   └ ⚙️ {} commands", module.commands.len()),
            String::new(),
        ]);
    }
    lines.push(format!("Use {0}ulm / {0}rlm to manage them", ctx.prefix));

    ctx.respond(&lines.join("\n")).await?;
    Ok(())
}

async fn module_help(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let name = required_arg(&ctx)?;
    let module = app
        .modules
        .get(&name)
        .ok_or_else(|| CommandError::InvalidArgs(format!("module {} is not loaded", name)))?;

    let grammars: BTreeMap<String, ArgGrammar> = app
        .router
        .commands_for(&BindingOwner::module(&name))
        .into_iter()
        .collect();

    let mut lines = vec![
        format!("📦 {} v{} by {}", module.name, module.version, module.author),
        module.description.clone(),
        String::new(),
    ];
    for (command, description) in &module.commands {
        let usage = grammars.get(command).map(ArgGrammar::usage).unwrap_or("");
        lines.push(format!("• {}{}{} - {}", ctx.prefix, command, usage, description));
    }

    ctx.respond(&lines.join("\n")).await?;
    Ok(())
}

/// Send the source file of a loaded module back to the chat
async fn send_module(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let name = required_arg(&ctx)?;
    let module = app
        .modules
        .get(&name)
        .ok_or_else(|| CommandError::InvalidArgs(format!("module {} is not loaded", name)))?;

    let mut lines = vec![
        format!("📦 Module {} v{}", module.name, module.version),
        format!("📝 {}", module.description),
    ];
    if !module.commands.is_empty() {
        lines.push(String::new());
        lines.extend(module.command_names().map(|c| format!("• {}{}", ctx.prefix, c)));
    }

    ctx.transport
        .send_file(&ctx.message.chat_id, &module.source_path, &lines.join("\n"))
        .await?;
    Ok(())
}

async fn find_modules(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let query = required_arg(&ctx)?;
    let progress = ctx.respond("🔍 Searching modules...").await?;

    let index = app.repository.index().await?;
    let found = index.search(&query);
    if found.is_empty() {
        ctx.update(&progress, &format!("🔍 Nothing found for '{}'", query)).await?;
        return Ok(());
    }

    let mut lines = vec![
        format!("🔍 Results for '{}': {} modules", query, found.len()),
        String::new(),
    ];
    for (name, entry) in found.iter().take(MAX_SEARCH_RESULTS) {
        let description: String = entry.description.chars().take(100).collect();
        let keywords = if entry.keywords.is_empty() {
            "none".to_string()
        } else {
            entry.keywords.join(", ")
        };
        let version = if entry.version.is_empty() { "?" } else { entry.version.as_str() };
        lines.extend([
            format!("📦 {} (v{})", name, version),
            format!("📝 {}", description),
            format!("🔎 Keywords: {}", keywords),
            format!("⬇️ {}dlm {}", ctx.prefix, app.repository.file_for(name)),
            String::new(),
        ]);
    }

    ctx.update(&progress, &lines.join("\n")).await?;
    Ok(())
}

async fn download(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    if !app.repository.is_configured() {
        return Err(RepositoryError::NotConfigured.into());
    }

    let file = app.repository.file_for(&required_arg(&ctx)?);
    let name = module_name_for(&app, &file)?;

    let progress = ctx.respond(&format!("⬇️ Downloading {}...", file)).await?;
    let body = app.repository.fetch(&file).await?;

    let path = app.modules.plugin_dir().join(&file);
    tokio::fs::write(&path, &body).await.map_err(StorageError::from)?;
    tracing::info!(module = %name, "Downloaded {}", file);

    let module = app.modules.load(&name, LoadOrigin::Fresh).await?;
    ctx.update(&progress, &module_card(&module, &ctx.prefix)).await?;
    Ok(())
}

async fn settings(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let args = ctx.arg(0).unwrap_or_default().to_string();
    let mut words = args.split_whitespace();

    match (words.next(), words.next()) {
        (None, _) => {
            let text = [
                "⚙️ Settings".to_string(),
                String::new(),
                format!("Prefix: {}", ctx.prefix),
                format!("Owner: {}", app.router.owner_id()),
                format!("Transport: {}", app.transport.name()),
                format!("Root: {}", app.paths.root.display()),
                format!("Load timeout: {}s", app.config.plugins.load_timeout_secs),
                format!("Call timeout: {}s", app.config.plugins.call_timeout_secs),
            ]
            .join("\n");
            ctx.respond(&text).await?;
        }
        (Some("prefix"), None) => {
            ctx.respond(&format!("ℹ️ Current prefix: {}", ctx.prefix)).await?;
        }
        (Some("prefix"), Some(value)) => {
            let prefix = app.state.write_prefix(value).await?;
            let extra = BTreeMap::from([("new_prefix".to_string(), prefix)]);
            let message = ctx
                .respond(&RestartKind::PrefixChange.progress_text(&extra))
                .await?;
            app.restart
                .prepare_restart(RestartKind::PrefixChange, Some(message), extra, &app.modules)
                .await?;
        }
        (Some(other), _) => {
            return Err(CommandError::InvalidArgs(format!("unknown setting: {}", other)).into());
        }
    }
    Ok(())
}

async fn logs(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let count = match ctx.arg(0) {
        Some(n) => n
            .parse::<usize>()
            .map_err(|_| CommandError::InvalidArgs(format!("not a line count: {}", n)))?,
        None => DEFAULT_LOG_LINES,
    }
    .clamp(1, MAX_LOG_LINES);

    let content = match tokio::fs::read_to_string(&app.paths.log_file).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ctx.respond("ℹ️ Log file not found").await?;
            return Ok(());
        }
        Err(e) => return Err(StorageError::from(e).into()),
    };

    let lines: Vec<&str> = content.lines().collect();
    let tail = lines[lines.len().saturating_sub(count)..].join("\n");
    ctx.respond(&format!("📄 Last {} log lines:\n{}", count.min(lines.len()), tail))
        .await?;
    Ok(())
}

async fn clean(app: Arc<App>, ctx: CommandContext) -> Result<(), BotError> {
    let removed = app.modules.clean_cache().await.map_err(StorageError::from)?;
    ctx.respond(&format!("✅ Cache cleaned: {} files removed", removed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_lists_commands_with_prefix() {
        let mut module = ModuleDescriptor::new("echo", "mods/echo.sh");
        module.commands.push(("echo".into(), "Echo text".into()));
        let card = module_card(&module, "!");
        assert!(card.contains("📦 Name: echo"));
        assert!(card.contains("• !echo - Echo text"));
    }

    #[test]
    fn test_core_table_has_unique_names() {
        let mut names: Vec<&str> = CORE_COMMANDS.iter().map(|(n, _, _)| *n).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CORE_COMMANDS.len());
    }
}
