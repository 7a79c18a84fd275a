use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use hotplug_bot::application::services::{reexec_current_process, ShutdownReason};
use hotplug_bot::domain::traits::Transport;
use hotplug_bot::infrastructure::adapters::{ConsoleTransport, TelegramTransport};
use hotplug_bot::infrastructure::config::Config;
use hotplug_bot::App;

#[derive(Parser)]
#[command(name = "hotplug-bot")]
#[command(about = "A chat bot whose commands are hot-loadable modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Telegram bot token (overrides config)
    #[arg(short, long)]
    token: Option<String>,

    /// State directory (overrides config)
    #[arg(short, long)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bot(&cli.config, cli.token, cli.root),
        Commands::Version => {
            println!("hotplug-bot v{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Commands::InitConfig => init_config(),
    }
}

fn load_config(path: &str, token: Option<String>, root: Option<PathBuf>) -> Result<Config, String> {
    let mut config = if Path::new(path).exists() {
        Config::load(path).map_err(|e| e.to_string())?
    } else {
        Config::default()
    };
    config.apply_env();
    if let Some(token) = token {
        config.set_token(token);
    }
    if let Some(root) = root {
        config.bot.root = root;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Log to stdout and append to the log file the `logs` command reads
fn init_logging(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer().with_target(false);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| eprintln!("Cannot open log file {}: {}", log_file.display(), e))
        .ok()
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
}

fn run_bot(config_path: &str, token: Option<String>, root: Option<PathBuf>) -> ExitCode {
    let config = match load_config(config_path, token, root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let paths = config.paths();
    if let Err(e) = paths.ensure() {
        eprintln!("Cannot create {}: {}", paths.root.display(), e);
        return ExitCode::FAILURE;
    }
    init_logging(&paths.log_file);
    tracing::info!("Starting {} in {}", config.bot.name, paths.root.display());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = rt.block_on(async move {
        let transport: Arc<dyn Transport> = match config.telegram_token() {
            Some(token) => Arc::new(TelegramTransport::new(token)),
            None => Arc::new(ConsoleTransport::new()),
        };

        let app = App::bootstrap(config, transport).await?;
        let summary = app.start().await;
        tracing::info!(
            "Ready: {} modules loaded, {} failed",
            summary.loaded.len(),
            summary.failed.len()
        );

        let signals = {
            let app = app.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, shutting down");
                    app.restart.request_exit();
                }
            })
        };

        let reason = app.run().await;
        signals.abort();
        reason
    });
    drop(rt);

    match outcome {
        Ok(Some(ShutdownReason::Restart(kind))) => {
            tracing::info!(kind = ?kind, "Re-executing");
            let e = reexec_current_process();
            tracing::error!("Restart failed: {}", e);
            ExitCode::FAILURE
        }
        Ok(_) => {
            tracing::info!("Stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_config() -> ExitCode {
    match serde_yaml::to_string(&Config::default()) {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render config: {}", e);
            ExitCode::FAILURE
        }
    }
}
