//! hotplug-bot - a chat bot runtime whose commands live in modules that can be
//! loaded, unloaded and reloaded while it runs.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::errors::BotError;
pub use application::App;
