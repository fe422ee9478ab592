//! Delayed and periodic message delivery.
//!
//! Every timer of a system runs on a single current-thread tokio runtime
//! owned by a dedicated `{name}-timer` thread. A firing calls
//! [`System::send`](crate::system::System::send) with the target as both
//! recipient and source; a failed delivery cancels the timer even when it
//! repeats.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::id::{ActorId, TimerId};
use crate::message::Message;
use crate::system::WeakSystem;

#[cfg(test)]
#[path = "timer.test.rs"]
mod tests;

/// Shortest period a repeating timer can tick at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// What a timer delivers, to whom, and how often.
pub(crate) struct TimerRequest {
    pub id: TimerId,
    pub target: ActorId,
    pub delay: Duration,
    pub message: Message,
    pub repeating: bool,
}

pub(crate) struct TimerService {
    handle: Handle,
    root: CancellationToken,
    timers: Mutex<HashMap<TimerId, CancellationToken>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn start(name: &str) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        let root = CancellationToken::new();

        let stopped = root.clone();
        let thread = thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || {
                runtime.block_on(stopped.cancelled());
                runtime.shutdown_background();
                tracing::debug!("timer thread stopped");
            })?;

        Ok(Self {
            handle,
            root,
            timers: Mutex::new(HashMap::new()),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn schedule(&self, request: TimerRequest, system: WeakSystem) {
        if self.root.is_cancelled() {
            tracing::debug!(timer = %request.id, "timer service stopped, timer not started");
            return;
        }
        let token = self.root.child_token();
        self.timers.lock().insert(request.id, token.clone());
        self.handle.spawn(fire(request, system, token));
    }

    /// Cancel a timer. Returns false when it already fired for the last time
    /// or was cancelled before.
    pub fn cancel(&self, id: TimerId) -> bool {
        match self.timers.lock().remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> usize {
        self.timers.lock().len()
    }

    /// Cancel every timer without waiting for the timer thread.
    pub fn abandon(&self) {
        self.root.cancel();
    }

    /// Cancel every timer and wait for the timer thread to exit.
    pub fn stop(&self) {
        self.root.cancel();
        self.timers.lock().clear();
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::warn!("timer thread ended with a panic");
        }
    }
}

async fn fire(request: TimerRequest, weak: WeakSystem, token: CancellationToken) {
    let TimerRequest {
        id,
        target,
        delay,
        message,
        repeating,
    } = request;
    let mut ticks = tokio::time::interval_at(Instant::now() + delay, delay.max(MIN_PERIOD));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticks.tick() => {}
        }
        let Some(system) = weak.upgrade() else {
            break;
        };
        let delivered = system.send(target, message.clone(), target);
        if !delivered {
            tracing::debug!(timer = %id, actor = %target, "delivery failed, cancelling timer");
        }
        if !delivered || !repeating {
            system.cancel_timer(id);
            break;
        }
    }
}
