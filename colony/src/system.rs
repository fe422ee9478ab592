//! The actor system: registry, delivery and control plane.
//!
//! A [`System`] owns everything an actor needs to run:
//! - The registry of live actors and the id generator
//! - Message delivery, including one hop of per-actor routing
//! - The two worker pools and their ready queues
//! - The timer service
//! - Control-plane statistics
//!
//! The handle is cheap to clone and is passed to handlers through their
//! [`Context`](crate::context::Context). There is no process-wide instance.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::actor::Actor;
use crate::cell::{ActorCell, Schedulable};
use crate::config::RuntimeConfig;
use crate::id::{ActorId, IdGenerator, TimerId};
use crate::mailbox::{ActorState, Enqueued};
use crate::message::Message;
use crate::scheduler::{BusyWorker, ReadyActor, Scheduler};
use crate::stats::{Stats, StatsReport};
use crate::timer::{TimerService, TimerRequest};

#[cfg(test)]
#[path = "system.test.rs"]
mod tests;

/// Errors that can occur during actor system operations
#[derive(thiserror::Error, Debug)]
pub enum SystemError {
    /// Another caller is creating an actor under this id right now.
    #[error("actor {0} is already being created")]
    AlreadyCreating(ActorId),

    /// An actor is already registered under this id.
    #[error("actor {0} is already registered")]
    AlreadyRegistered(ActorId),

    #[error("system is not running")]
    NotRunning,

    /// A worker or timer thread could not be started.
    #[error("failed to start runtime thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SystemError {
    /// Whether the error reports a conflicting or duplicate creation.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::AlreadyCreating(_) | Self::AlreadyRegistered(_))
    }
}

pub(crate) struct SystemInner {
    config: RuntimeConfig,
    running: AtomicBool,
    actor_ids: IdGenerator,
    timer_ids: IdGenerator,
    registry: RwLock<HashMap<ActorId, ReadyActor>>,
    /// Ids reserved by a creation that has not registered yet.
    pending: Mutex<HashSet<ActorId>>,
    scheduler: Scheduler,
    timers: TimerService,
    stats: Stats,
    stopped: Mutex<bool>,
    stopped_signal: Condvar,
}

impl Drop for SystemInner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.timers.abandon();
    }
}

/// Handle held by workers and timers so they never keep a dropped system alive.
#[derive(Clone)]
pub(crate) struct WeakSystem(Weak<SystemInner>);

impl WeakSystem {
    pub fn upgrade(&self) -> Option<System> {
        self.0.upgrade().map(|inner| System { inner })
    }
}

/// The actor system that manages actor lifecycles and message delivery.
///
/// # Example
/// ```no_run
/// use colony::prelude::*;
///
/// struct Blinker;
///
/// impl Actor for Blinker {
///     fn on_init(&mut self, ctx: &mut Context<'_, Self>, _: &Message) -> HandlerResult {
///         ctx.subscribe("Blink", |_, _, _| Ok(()));
///         ctx.start_timer(std::time::Duration::from_millis(500), Message::new("Blink"), true);
///         Ok(())
///     }
///
///     fn on_finalize(&mut self, _: &mut Context<'_, Self>, _: &Message) -> HandlerResult {
///         Ok(())
///     }
/// }
///
/// let system = System::local("rover")?;
/// let blinker = system.create(Blinker)?;
/// system.shutdown_actor(blinker, false);
/// system.shutdown();
/// # Ok::<(), colony::system::SystemError>(())
/// ```
#[derive(Clone)]
pub struct System {
    inner: Arc<SystemInner>,
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.inner.config.name)
            .field("running", &self.is_running())
            .field("actors", &self.actor_count())
            .finish()
    }
}

impl System {
    /// Start a system: both worker pools and the timer thread.
    pub fn new(config: RuntimeConfig) -> Result<Self, SystemError> {
        let (scheduler, receivers) = Scheduler::new();
        let timers = TimerService::start(&config.name)?;
        let system = System {
            inner: Arc::new(SystemInner {
                config,
                running: AtomicBool::new(true),
                actor_ids: IdGenerator::starting_at(ActorId::FIRST_GENERATED),
                timer_ids: IdGenerator::starting_at(1),
                registry: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
                scheduler,
                timers,
                stats: Stats::default(),
                stopped: Mutex::new(false),
                stopped_signal: Condvar::new(),
            }),
        };

        let spawned =
            system
                .inner
                .scheduler
                .spawn_pools(&system.inner.config, system.downgrade(), receivers);
        if let Err(err) = spawned {
            system.shutdown();
            return Err(SystemError::Spawn(err));
        }

        tracing::info!(system = %system.inner.config.name, "actor system started");
        Ok(system)
    }

    /// Start a system with default settings.
    pub fn local<S: Into<String>>(name: S) -> Result<Self, SystemError> {
        Self::new(RuntimeConfig::named(name))
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Register `actor` under a freshly generated id and deliver its Init.
    #[tracing::instrument(skip_all, fields(system = %self.inner.config.name))]
    pub fn create<A: Actor>(&self, actor: A) -> Result<ActorId, SystemError> {
        self.ensure_running()?;
        let started = Instant::now();
        let id = loop {
            let candidate = self.inner.actor_ids.next_actor();
            if self.reserve(candidate).is_ok() {
                break candidate;
            }
        };
        self.register(id, actor, started)
    }

    /// Register `actor` under an explicit id and deliver its Init.
    ///
    /// Fails with an illegal-state error when the id is taken or another
    /// caller is creating an actor under it at the same time.
    #[tracing::instrument(skip(self, actor), fields(system = %self.inner.config.name))]
    pub fn create_with_id<A: Actor>(&self, id: ActorId, actor: A) -> Result<ActorId, SystemError> {
        self.ensure_running()?;
        let started = Instant::now();
        self.reserve(id)?;
        self.register(id, actor, started)
    }

    fn ensure_running(&self) -> Result<(), SystemError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SystemError::NotRunning)
        }
    }

    fn reserve(&self, id: ActorId) -> Result<(), SystemError> {
        let mut pending = self.inner.pending.lock();
        if self.inner.registry.read().contains_key(&id) {
            return Err(SystemError::AlreadyRegistered(id));
        }
        if !pending.insert(id) {
            return Err(SystemError::AlreadyCreating(id));
        }
        Ok(())
    }

    fn register<A: Actor>(
        &self,
        id: ActorId,
        actor: A,
        started: Instant,
    ) -> Result<ActorId, SystemError> {
        let cell: ReadyActor = Arc::new(ActorCell::new(id, actor));
        let pool = if cell.uses_blocking_pool() {
            "blocking"
        } else {
            "normal"
        };
        self.inner.registry.write().insert(id, cell.clone());
        self.inner.pending.lock().remove(&id);
        // Shutdown may have emptied the registry between the check and the insert.
        if !self.is_running() {
            self.inner.registry.write().remove(&id);
            tracing::debug!(actor = %id, "creation raced shutdown, actor discarded");
            return Err(SystemError::NotRunning);
        }
        tracing::debug!(actor = %id, pool, "actor created");

        self.deliver(&cell, Message::init().addressed_to(id));
        self.sample_stat("system.create", elapsed_millis(started));
        Ok(id)
    }

    fn lookup(&self, id: ActorId) -> Option<ReadyActor> {
        self.inner.registry.read().get(&id).cloned()
    }

    /// Deliver `message` to `target` on behalf of `source`.
    ///
    /// If the target routes the message name elsewhere, the message goes to
    /// the routed actor instead, or stays with the target when the routed
    /// actor no longer exists. Returns false when the target does not exist
    /// or is terminating.
    pub fn send(&self, target: ActorId, message: Message, source: ActorId) -> bool {
        let started = Instant::now();
        let recipient = {
            let registry = self.inner.registry.read();
            let Some(actor) = registry.get(&target) else {
                tracing::debug!(
                    actor = %target,
                    source = %source,
                    message = %message.name(),
                    "dropping message for unknown actor"
                );
                return false;
            };
            match actor.route(message.name()) {
                Some(routed) if !message.is_reserved() => match registry.get(&routed) {
                    Some(routed_actor) => routed_actor.clone(),
                    None => {
                        tracing::trace!(
                            actor = %target,
                            routed = %routed,
                            message = %message.name(),
                            "routed actor is gone, delivering to the original target"
                        );
                        actor.clone()
                    }
                },
                _ => actor.clone(),
            }
        };

        tracing::trace!(
            actor = %recipient.id(),
            source = %source,
            message = %message.name(),
            "sending"
        );
        let accepted = self.deliver(&recipient, message.addressed_to(target));
        self.sample_stat("system.send", elapsed_millis(started));
        accepted
    }

    fn deliver(&self, actor: &ReadyActor, message: Message) -> bool {
        match actor.enqueue(message) {
            Enqueued::Schedule => {
                self.schedule(actor.clone());
                true
            }
            Enqueued::Pending => true,
            Enqueued::Dropped => false,
        }
    }

    pub(crate) fn schedule(&self, actor: ReadyActor) {
        self.inner.scheduler.schedule(actor);
    }

    /// Put a registered actor back on its ready queue.
    pub(crate) fn reschedule(&self, actor: ActorId) {
        if let Some(cell) = self.lookup(actor) {
            self.schedule(cell);
        }
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Deliver `message` to `actor` after `delay`, and every `delay` after
    /// that when `repeating`.
    pub fn start_timer(
        &self,
        actor: ActorId,
        delay: Duration,
        message: Message,
        repeating: bool,
    ) -> TimerId {
        let started = Instant::now();
        let id = self.inner.timer_ids.next_timer();
        let request = TimerRequest {
            id,
            target: actor,
            delay,
            message,
            repeating,
        };
        self.inner.timers.schedule(request, self.downgrade());
        tracing::trace!(timer = %id, actor = %actor, ?delay, repeating, "timer started");
        self.sample_stat("system.start_timer", elapsed_millis(started));
        id
    }

    /// Cancel a timer. Safe to call more than once and while it fires.
    pub fn cancel_timer(&self, timer: TimerId) -> bool {
        let started = Instant::now();
        let cancelled = self.inner.timers.cancel(timer);
        if cancelled {
            tracing::trace!(timer = %timer, "timer cancelled");
        }
        self.sample_stat("system.cancel_timer", elapsed_millis(started));
        cancelled
    }

    pub fn active_timers(&self) -> usize {
        self.inner.timers.active()
    }

    /// End the lifecycle of `actor` from outside its handlers.
    ///
    /// Behaves like [`Context::shutdown`](crate::context::Context::shutdown).
    /// Returns false when the actor does not exist or is already terminating.
    pub fn shutdown_actor(&self, actor: ActorId, immediate: bool) -> bool {
        let Some(cell) = self.lookup(actor) else {
            return false;
        };
        tracing::debug!(actor = %actor, immediate, "actor scheduled for destruction");
        if !immediate {
            if cell.state() == ActorState::Terminating {
                return false;
            }
            self.start_timer(
                actor,
                self.inner.config.shutdown_grace,
                Message::finalize(),
                false,
            );
            return true;
        }
        match cell.request_finalize() {
            Enqueued::Schedule => {
                self.schedule(cell);
                true
            }
            Enqueued::Pending => true,
            Enqueued::Dropped => false,
        }
    }

    /// Set or clear a route on `actor` from outside its handlers.
    pub fn set_route(&self, actor: ActorId, name: &str, target: Option<ActorId>) -> bool {
        match self.lookup(actor) {
            Some(cell) => {
                cell.set_route(name, target);
                true
            }
            None => false,
        }
    }

    /// Where a message named `name` sent to `actor` would be delivered.
    pub fn resolve_target(&self, actor: ActorId, name: &str) -> Option<ActorId> {
        let cell = self.lookup(actor)?;
        Some(cell.route(name).unwrap_or(actor))
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.inner.registry.read().contains_key(&actor)
    }

    pub fn actor_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    pub fn actor_state(&self, actor: ActorId) -> Option<ActorState> {
        self.lookup(actor).map(|cell| cell.state())
    }

    /// Messages waiting in the mailbox of `actor`.
    pub fn queued_messages(&self, actor: ActorId) -> Option<usize> {
        self.lookup(actor).map(|cell| cell.queued())
    }

    /// Remove a drained actor from the registry.
    pub(crate) fn remove(&self, actor: ActorId) -> bool {
        let removed = self.inner.registry.write().remove(&actor).is_some();
        if removed {
            tracing::debug!(actor = %actor, "actor destroyed");
        }
        removed
    }

    /// Record one sample of the statistic `name`.
    pub fn sample_stat(&self, name: &str, value: f64) {
        self.inner.stats.sample(name, value);
    }

    /// Snapshot every statistic and reset them.
    pub fn flush_stats(&self) -> StatsReport {
        self.inner.stats.flush()
    }

    /// Report normal-pool workers that have been on one batch for longer
    /// than the configured warning threshold.
    pub fn check_thread_activity(&self) -> Vec<BusyWorker> {
        let busy = self
            .inner
            .scheduler
            .busy_longer_than(self.inner.config.long_batch_warning);
        for worker in &busy {
            tracing::warn!(
                thread = %worker.thread,
                busy_for = ?worker.busy_for,
                "worker has been handling one batch for a long time"
            );
        }
        busy
    }

    /// Stop the system.
    ///
    /// Workers leave their loops between batches. Each pool gets the
    /// configured drain timeout to finish in-flight batches before it is
    /// abandoned, then the timer service stops and every actor is dropped.
    /// Only the first call does anything.
    #[tracing::instrument(skip(self), fields(system = %self.inner.config.name))]
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("shutting down actor system");

        self.inner.scheduler.stop(self.inner.config.drain_timeout);
        self.inner.timers.stop();

        let registry = std::mem::take(&mut *self.inner.registry.write());
        let remaining = registry.len();
        drop(registry);

        *self.inner.stopped.lock() = true;
        self.inner.stopped_signal.notify_all();
        tracing::info!(remaining, "actor system stopped");
    }

    /// Block until [`System::shutdown`] has completed.
    pub fn wait_for_shutdown(&self) {
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            self.inner.stopped_signal.wait(&mut stopped);
        }
    }

    /// Like [`System::wait_for_shutdown`], giving up after `timeout`.
    /// Returns whether the system stopped.
    pub fn wait_for_shutdown_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self
                .inner
                .stopped_signal
                .wait_until(&mut stopped, deadline)
                .timed_out()
            {
                break;
            }
        }
        *stopped
    }

    pub(crate) fn downgrade(&self) -> WeakSystem {
        WeakSystem(Arc::downgrade(&self.inner))
    }
}

fn elapsed_millis(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
