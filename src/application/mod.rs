//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - App: the runtime context and its message loop
//! - Routing: command grammar and dispatch
//! - Services: module lifecycle, restarts, core commands
//! - Errors: error types for every layer

pub mod app;
pub mod errors;
pub mod routing;
pub mod services;

pub use app::App;
