//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: Small state files that survive restarts
//! - Adapters: Transports (Telegram, console, in-memory)
//! - Plugins: Loading and talking to module code
//! - Repository: Remote module files and their search index
//! - Backup, Dependencies: what happens to a module file before it starts

pub mod adapters;
pub mod backup;
pub mod config;
pub mod dependencies;
pub mod plugins;
pub mod repository;
pub mod storage;
