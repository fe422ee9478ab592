//! The runtime side of an actor: its mailbox, state and handlers, and the
//! batch loop a worker runs when it picks the actor off a ready queue.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

use crate::actor::{Actor, HandlerError, Subscriptions};
use crate::context::Context;
use crate::id::ActorId;
use crate::mailbox::{ActorState, Drained, Enqueued, Mailbox};
use crate::message::Message;
use crate::system::System;

#[cfg(test)]
#[path = "cell.test.rs"]
mod tests;

/// Maximum number of mailbox messages handled per worker turn.
pub const FAIRNESS_BATCH: usize = 10;

/// A fault that must bring the whole system down.
#[derive(thiserror::Error, Debug)]
pub(crate) enum Fatal {
    #[error("actor {actor} handler for '{message}' reported an unrecoverable error: {reason}")]
    Handler {
        actor: ActorId,
        message: String,
        reason: String,
    },
}

/// Scheduler-facing interface of an actor, independent of its concrete type.
pub(crate) trait Schedulable: Send + Sync {
    fn id(&self) -> ActorId;

    fn uses_blocking_pool(&self) -> bool;

    fn enqueue(&self, message: Message) -> Enqueued;

    fn request_finalize(&self) -> Enqueued;

    /// Handle up to [`FAIRNESS_BATCH`] messages. Must only be called by the
    /// worker that took the actor off a ready queue.
    fn drain_batch(&self, system: &System) -> Result<Drained, Fatal>;

    fn route(&self, name: &str) -> Option<ActorId>;

    fn set_route(&self, name: &str, target: Option<ActorId>);

    fn state(&self) -> ActorState;

    fn queued(&self) -> usize;
}

struct Body<A: Actor> {
    actor: A,
    subscriptions: Subscriptions<A>,
}

pub(crate) struct ActorCell<A: Actor> {
    id: ActorId,
    blocking: bool,
    mailbox: Mailbox,
    /// Only locked by the worker processing the actor, so never contended.
    body: Mutex<Body<A>>,
}

impl<A: Actor> ActorCell<A> {
    pub fn new(id: ActorId, actor: A) -> Self {
        Self {
            id,
            blocking: actor.uses_blocking_pool(),
            mailbox: Mailbox::new(),
            body: Mutex::new(Body {
                actor,
                subscriptions: Subscriptions::new(),
            }),
        }
    }

    fn run_batch(&self, body: &mut Body<A>, system: &System) -> Result<(), Fatal> {
        for _ in 0..FAIRNESS_BATCH {
            let Some(message) = self.mailbox.next() else {
                break;
            };
            self.dispatch(body, system, message)?;
        }
        Ok(())
    }

    /// Run every handler subscribed to `message`, then any local stimuli the
    /// handlers raised.
    fn dispatch(&self, body: &mut Body<A>, system: &System, message: Message) -> Result<(), Fatal> {
        let mut pending = VecDeque::from([message]);
        while let Some(message) = pending.pop_front() {
            if message.name() == Message::FINALIZE {
                let discarded = self.mailbox.terminate();
                tracing::debug!(actor = %self.id, discarded, "actor is being destroyed");
            } else if self.mailbox.is_terminating() {
                tracing::trace!(actor = %self.id, message = %message.name(), "dropping stimulus after finalize");
                continue;
            }

            let handlers = body.subscriptions.handlers_for(message.name());
            if handlers.is_empty() {
                tracing::debug!(actor = %self.id, message = %message.name(), "no subscribers");
                continue;
            }

            tracing::trace!(actor = %self.id, message = %message.name(), handlers = handlers.len(), "dispatching");
            let Body {
                actor,
                subscriptions,
            } = &mut *body;
            let mut ctx = Context::new(self.id, system, subscriptions, &self.mailbox);
            for handler in handlers {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| (*handler)(actor, &mut ctx, &message)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(HandlerError::Fatal(reason))) => {
                        return Err(Fatal::Handler {
                            actor: self.id,
                            message: message.name().to_string(),
                            reason,
                        });
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(
                            actor = %self.id,
                            message = %message.name(),
                            %error,
                            "handler failed"
                        );
                    }
                    Err(panic) => {
                        tracing::error!(
                            actor = %self.id,
                            message = %message.name(),
                            reason = %panic_reason(panic.as_ref()),
                            "handler panicked"
                        );
                    }
                }
            }

            // Stimuli run before anything stimulated earlier, in the order raised.
            for stimulus in ctx.into_stimuli().into_iter().rev() {
                pending.push_front(stimulus);
            }
        }
        Ok(())
    }
}

impl<A: Actor> Schedulable for ActorCell<A> {
    fn id(&self) -> ActorId {
        self.id
    }

    fn uses_blocking_pool(&self) -> bool {
        self.blocking
    }

    fn enqueue(&self, message: Message) -> Enqueued {
        let enqueued = self.mailbox.enqueue(message);
        if enqueued == Enqueued::Dropped {
            tracing::debug!(actor = %self.id, "message dropped because the actor is terminating");
        }
        enqueued
    }

    fn request_finalize(&self) -> Enqueued {
        self.mailbox
            .request_finalize(Message::finalize().addressed_to(self.id))
    }

    fn drain_batch(&self, system: &System) -> Result<Drained, Fatal> {
        let settle = SettleOnUnwind::new(self.id, &self.mailbox, system);
        let outcome = {
            let mut body = self.body.lock();
            self.run_batch(&mut body, system)
        };
        // Settle even after a fatal fault so the state stays consistent.
        let drained = settle.finish();
        outcome.map(|()| drained)
    }

    fn route(&self, name: &str) -> Option<ActorId> {
        self.mailbox.route(name)
    }

    fn set_route(&self, name: &str, target: Option<ActorId>) {
        let target = target.filter(|target| *target != self.id);
        self.mailbox.set_route(name, target);
    }

    fn state(&self) -> ActorState {
        self.mailbox.state()
    }

    fn queued(&self) -> usize {
        self.mailbox.len()
    }
}

/// Settles a mailbox left `Processing` by a batch that unwound, and hands
/// the actor back to the scheduler or the registry as the outcome requires.
struct SettleOnUnwind<'a> {
    id: ActorId,
    mailbox: &'a Mailbox,
    system: &'a System,
    armed: bool,
}

impl<'a> SettleOnUnwind<'a> {
    fn new(id: ActorId, mailbox: &'a Mailbox, system: &'a System) -> Self {
        Self {
            id,
            mailbox,
            system,
            armed: true,
        }
    }

    fn finish(mut self) -> Drained {
        self.armed = false;
        self.mailbox.settle()
    }
}

impl Drop for SettleOnUnwind<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let drained = self.mailbox.settle();
        tracing::warn!(actor = %self.id, ?drained, "settled mailbox after an aborted batch");
        match drained {
            Drained::Idle => {}
            Drained::Requeue => self.system.reschedule(self.id),
            Drained::Terminated => {
                self.system.remove(self.id);
            }
        }
    }
}

pub(crate) fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
