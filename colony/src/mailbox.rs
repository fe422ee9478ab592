use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::id::ActorId;
use crate::message::Message;

#[cfg(test)]
#[path = "mailbox.test.rs"]
mod tests;

const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Scheduling state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// No pending messages and not on a ready queue.
    Idle,
    /// On a ready queue, waiting for a worker.
    Queued,
    /// A worker is running the actor's handlers.
    Processing,
    /// Finalizing; no further messages are accepted.
    Terminating,
}

/// What the caller of [`Mailbox::enqueue`] must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// The actor was idle and must be pushed onto its ready queue.
    Schedule,
    /// The actor is already queued or processing; nothing else to do.
    Pending,
    /// The actor is terminating and the message was discarded.
    Dropped,
}

/// How a batch left the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drained {
    Idle,
    /// More work is pending; the actor is queued again.
    Requeue,
    /// The actor finished finalizing and must leave the registry.
    Terminated,
}

struct MailboxState {
    state: ActorState,
    queue: VecDeque<Message>,
    /// Finalize requested out of band. Served before anything in `queue`.
    control: Option<Message>,
    routes: HashMap<Arc<str>, ActorId>,
}

/// The queue, lifecycle state and routing table of one actor, guarded by a
/// single lock. Handler code never runs while this lock is held.
pub(crate) struct Mailbox {
    inner: Mutex<MailboxState>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MailboxState {
                state: ActorState::Idle,
                queue: VecDeque::with_capacity(DEFAULT_QUEUE_CAPACITY),
                control: None,
                routes: HashMap::new(),
            }),
        }
    }

    pub fn enqueue(&self, message: Message) -> Enqueued {
        let mut inner = self.inner.lock();
        match inner.state {
            ActorState::Terminating => Enqueued::Dropped,
            ActorState::Idle => {
                inner.queue.push_back(message);
                inner.state = ActorState::Queued;
                Enqueued::Schedule
            }
            ActorState::Queued | ActorState::Processing => {
                inner.queue.push_back(message);
                Enqueued::Pending
            }
        }
    }

    /// Enter `Terminating` now and hand `finalize` to the next worker turn.
    ///
    /// Everything still queued is discarded. Returns [`Enqueued::Dropped`]
    /// when the actor was already terminating.
    pub fn request_finalize(&self, finalize: Message) -> Enqueued {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        if previous == ActorState::Terminating {
            return Enqueued::Dropped;
        }
        inner.state = ActorState::Terminating;
        inner.queue.clear();
        inner.control = Some(finalize);
        match previous {
            ActorState::Idle => Enqueued::Schedule,
            _ => Enqueued::Pending,
        }
    }

    /// Take the next message for the processing worker.
    pub fn next(&self) -> Option<Message> {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.control.take() {
            return Some(message);
        }
        if inner.state == ActorState::Terminating {
            return None;
        }
        inner.state = ActorState::Processing;
        inner.queue.pop_front()
    }

    /// Enter `Terminating`, returning how many queued messages were discarded.
    pub fn terminate(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.state = ActorState::Terminating;
        let discarded = inner.queue.len();
        inner.queue.clear();
        discarded
    }

    pub fn is_terminating(&self) -> bool {
        self.inner.lock().state == ActorState::Terminating
    }

    /// Settle the state at the end of a batch.
    pub fn settle(&self) -> Drained {
        let mut inner = self.inner.lock();
        if inner.state == ActorState::Terminating {
            if inner.control.is_some() {
                // A finalize arrived after the batch took its last message.
                return Drained::Requeue;
            }
            inner.queue.clear();
            return Drained::Terminated;
        }
        if inner.queue.is_empty() {
            inner.state = ActorState::Idle;
            Drained::Idle
        } else {
            inner.state = ActorState::Queued;
            Drained::Requeue
        }
    }

    pub fn state(&self) -> ActorState {
        self.inner.lock().state
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Redirect messages named `name` to `target`, or clear the redirection.
    pub fn set_route(&self, name: &str, target: Option<ActorId>) {
        let mut inner = self.inner.lock();
        match target {
            Some(target) => {
                inner.routes.insert(Arc::from(name), target);
            }
            None => {
                inner.routes.remove(name);
            }
        }
    }

    pub fn route(&self, name: &str) -> Option<ActorId> {
        self.inner.lock().routes.get(name).copied()
    }
}
