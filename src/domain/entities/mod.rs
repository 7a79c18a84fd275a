//! Domain entities - Core objects shared by the router, the module manager
//! and the transports

pub mod command;
pub mod message;
pub mod module;
pub mod restart;
pub mod user;

pub use command::{ArgGrammar, BindingId, CommandSpec};
pub use message::{Attachment, IncomingMessage, MessageRef};
pub use module::{LoadOrigin, ModuleDescriptor, ModuleState};
pub use restart::{RestartKind, RestartStatus};
pub use user::User;
