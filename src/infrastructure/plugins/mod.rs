//! Plugin hosting
//!
//! A module is a file in the modules directory. Script files run as worker
//! processes (interpreter chosen by extension) and shared libraries are
//! opened in-process from a shadow copy. Both speak the JSON protocol in
//! [`protocol`].

pub mod cache;
pub mod loader;
pub mod manifest;
pub mod native;
pub mod protocol;
pub mod registry;
pub mod worker;

pub use cache::ModuleCache;
pub use loader::{LoadedPlugin, PluginHost, PluginLoader};
pub use manifest::PluginManifest;
pub use protocol::{MessageEnvelope, PluginAction, PluginInfo};
pub use registry::{LoadedModule, ModuleRegistry};
