//! Commonly used actor system types and traits.
//!
//! Import this module to get started with the basic actor functionality.

pub use super::actor::{
    Actor,         // Core actor trait
    Handler,       // A subscribed message handler
    HandlerError,  // Errors reported by handlers
    HandlerResult, // What every handler returns
    Subscriptions, // Name to handler list table
};
pub use super::completion::CompletionSet; // Wait for several named steps
pub use super::config::RuntimeConfig;
pub use super::context::Context; // Actor context for message handling
pub use super::id::{ActorId, TimerId};
pub use super::mailbox::ActorState;
pub use super::message::{Message, Payload};
pub use super::system::{
    System,      // The actor system itself
    SystemError, // System-level errors
};
