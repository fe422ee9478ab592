//! Core actor traits and types for the actor system.
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;

use super::message::Message;

/// Errors a message handler can report back to the runtime.
///
/// Every variant except [`HandlerError::Fatal`] is an ordinary fault: the
/// runtime logs it and carries on with the next handler and the next message.
/// A fatal error shuts the whole system down.
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    /// The handler could not complete for the given reason.
    #[error("{0}")]
    Failed(String),

    /// The message payload did not have the expected shape.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Any other error raised by handler code.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),

    /// The process is no longer healthy and the runtime must stop.
    #[error("unrecoverable: {0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// A subscribed message handler.
///
/// Handlers receive the actor's state, its context and the message. They are
/// only ever invoked by the one worker thread currently processing the actor.
pub type Handler<A> =
    Arc<dyn Fn(&mut A, &mut Context<'_, A>, &Message) -> HandlerResult + Send + Sync>;

/// The core actor trait that must be implemented by all actors.
///
/// Actors are the fundamental unit of computation in the actor system. They:
/// - Process messages one at a time
/// - Maintain private state
/// - Can send messages to other actors
/// - Have a lifecycle managed by the system
///
/// `on_init` and `on_finalize` are subscribed like any other handler, under
/// [`Message::INIT`] and [`Message::FINALIZE`]. `on_init` is the usual place
/// to subscribe to application messages and start timers.
pub trait Actor: Send + Sized + 'static {
    /// Called once the actor is registered, before any other message.
    fn on_init(&mut self, ctx: &mut Context<'_, Self>, message: &Message) -> HandlerResult;

    /// Called as the actor terminates. Messages still queued at this point
    /// have already been discarded.
    fn on_finalize(&mut self, ctx: &mut Context<'_, Self>, message: &Message) -> HandlerResult;

    /// Actors that perform blocking work run on the blocking pool so they
    /// cannot starve compute-bound actors.
    fn uses_blocking_pool(&self) -> bool {
        false
    }
}

/// The name → ordered handler list table of one actor.
pub struct Subscriptions<A: Actor> {
    handlers: HashMap<Arc<str>, Vec<Handler<A>>>,
}

impl<A: Actor> Subscriptions<A> {
    pub(crate) fn new() -> Self {
        let mut subscriptions = Self {
            handlers: HashMap::new(),
        };
        subscriptions.subscribe(Message::INIT, |actor, ctx, message| {
            actor.on_init(ctx, message)
        });
        subscriptions.subscribe(Message::FINALIZE, |actor, ctx, message| {
            actor.on_finalize(ctx, message)
        });
        subscriptions
    }

    /// Append `handler` to the handlers run for messages named `name`.
    pub fn subscribe<F>(&mut self, name: impl Into<Arc<str>>, handler: F)
    where
        F: Fn(&mut A, &mut Context<'_, A>, &Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .entry(name.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Remove every handler for `name`, returning how many were removed.
    pub fn unsubscribe_all(&mut self, name: &str) -> usize {
        self.handlers.remove(name).map_or(0, |handlers| handlers.len())
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, Vec::len)
    }

    /// Snapshot of the handlers for `name`, in registration order.
    pub(crate) fn handlers_for(&self, name: &str) -> Vec<Handler<A>> {
        self.handlers.get(name).cloned().unwrap_or_default()
    }
}
