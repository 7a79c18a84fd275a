//! Command routing - prefix tokenizer, binding table and owner gate

pub mod grammar;
pub mod router;

pub use grammar::{tokenize, CommandLine};
pub use router::{
    BindingOwner, CommandBinding, CommandContext, CommandRouter, Dispatch, Handler, HandlerFuture,
};
