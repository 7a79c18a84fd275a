//! Transport adapters

pub mod console;
pub mod memory;
pub mod telegram;

pub use console::ConsoleTransport;
pub use memory::MemoryTransport;
pub use telegram::TelegramTransport;
