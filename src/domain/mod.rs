//! Domain layer - Core types with no knowledge of concrete transports
//!
//! This layer contains:
//! - Entities: messages, command specs, module descriptors, restart records
//! - Traits: the transport abstraction the runtime is driven through

pub mod entities;
pub mod traits;
