use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    actor::{Actor, HandlerResult, Subscriptions},
    id::{ActorId, TimerId},
    mailbox::Mailbox,
    message::Message,
    system::System,
};

/// Provides context and capabilities to actors during message handling.
///
/// The context gives handlers access to:
/// - The actor's own id and subscription table
/// - The system, for sending messages and starting timers
/// - The actor's routing table
/// - Lifecycle control (local stimulation and shutdown)
pub struct Context<'a, A>
where
    A: Actor,
{
    id: ActorId,
    system: &'a System,
    subscriptions: &'a mut Subscriptions<A>,
    mailbox: &'a Mailbox,
    stimuli: VecDeque<Message>,
}

impl<'a, A> Context<'a, A>
where
    A: Actor,
{
    pub(crate) fn new(
        id: ActorId,
        system: &'a System,
        subscriptions: &'a mut Subscriptions<A>,
        mailbox: &'a Mailbox,
    ) -> Self {
        Context {
            id,
            system,
            subscriptions,
            mailbox,
            stimuli: VecDeque::new(),
        }
    }

    pub(crate) fn into_stimuli(self) -> VecDeque<Message> {
        self.stimuli
    }
}

impl<A> Context<'_, A>
where
    A: Actor,
{
    /// The id of the actor handling the current message.
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Access the actor system.
    pub fn system(&self) -> &System {
        self.system
    }

    /// Subscribe a handler. It takes effect from the next message on.
    pub fn subscribe<F>(&mut self, name: impl Into<Arc<str>>, handler: F)
    where
        F: Fn(&mut A, &mut Context<'_, A>, &Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(name, handler);
    }

    pub fn unsubscribe_all(&mut self, name: &str) -> usize {
        self.subscriptions.unsubscribe_all(name)
    }

    pub fn subscriptions(&self) -> &Subscriptions<A> {
        &*self.subscriptions
    }

    /// Send a message to another actor, or to this one, with this actor as source.
    pub fn send(&self, target: ActorId, message: Message) -> bool {
        self.system.send(target, message, self.id)
    }

    /// Start a timer delivering `message` to this actor.
    pub fn start_timer(&self, delay: Duration, message: Message, repeating: bool) -> TimerId {
        self.system.start_timer(self.id, delay, message, repeating)
    }

    pub fn cancel_timer(&self, timer: TimerId) -> bool {
        self.system.cancel_timer(timer)
    }

    /// Redirect messages sent to this actor under `name` to `target`.
    ///
    /// Passing `None`, or this actor's own id, removes the redirection.
    pub fn set_route(&self, name: &str, target: Option<ActorId>) {
        let target = target.filter(|target| *target != self.id);
        self.mailbox.set_route(name, target);
    }

    /// The actor a message named `name` addressed to this actor is delivered to.
    pub fn resolve_target(&self, name: &str) -> ActorId {
        self.mailbox.route(name).unwrap_or(self.id)
    }

    /// Run this actor's handlers for `message` without going through the
    /// mailbox. The stimulus is handled on this thread as soon as the current
    /// handler chain returns, ahead of the next queued message.
    pub fn stimulate(&mut self, message: Message) {
        self.stimuli.push_back(message);
    }

    /// End this actor's lifecycle.
    ///
    /// With `immediate`, the actor stops accepting messages now, discards
    /// whatever is queued and finalizes before its next message. Otherwise a
    /// finalize message is delivered after the configured grace period so
    /// in-flight messages can drain first.
    pub fn shutdown(&mut self, immediate: bool) {
        if immediate {
            let finalize = Message::finalize().addressed_to(self.id);
            self.mailbox.request_finalize(finalize);
        } else {
            let grace = self.system.config().shutdown_grace;
            self.start_timer(grace, Message::finalize(), false);
        }
        tracing::debug!(actor = %self.id, immediate, "actor scheduled for destruction");
    }
}
