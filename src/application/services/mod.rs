//! Application services - module lifecycle, restarts and the built-in commands

pub mod core_commands;
pub mod module_manager;
pub mod restart;

pub use core_commands::{register_core_commands, CORE_COMMANDS};
pub use module_manager::{LoadSummary, ModuleManager};
pub use restart::{reexec_current_process, RestartController, ShutdownReason};
