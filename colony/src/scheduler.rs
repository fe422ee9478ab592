//! Ready queues and the worker pools that drain them.
//!
//! There are two pools. The normal pool runs compute-bound actors; the
//! blocking pool runs actors that declared they perform blocking work, so a
//! slow device read can never starve a control loop. Each pool pulls from its
//! own ready queue. An actor is on at most one queue, at most once, because
//! only the thread that moves it to `Queued` pushes it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::cell::{Schedulable, panic_reason};
use crate::config::RuntimeConfig;
use crate::mailbox::Drained;
use crate::system::WeakSystem;

pub(crate) type ReadyActor = Arc<dyn Schedulable>;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PoolKind {
    Normal,
    Blocking,
}

/// A normal-pool worker that has been busy on one batch for a long time.
#[derive(Debug, Clone, Serialize)]
pub struct BusyWorker {
    pub thread: String,
    pub busy_for: Duration,
}

/// Start times of the batches currently running on normal-pool workers.
#[derive(Default)]
struct Activity {
    started: Mutex<HashMap<ThreadId, (String, Instant)>>,
}

impl Activity {
    fn mark_start(&self) {
        let current = thread::current();
        let name = current.name().unwrap_or("unnamed").to_string();
        self.started
            .lock()
            .insert(current.id(), (name, Instant::now()));
    }

    fn mark_stop(&self) {
        self.started.lock().remove(&thread::current().id());
    }

    fn busy_longer_than(&self, threshold: Duration) -> Vec<BusyWorker> {
        let now = Instant::now();
        self.started
            .lock()
            .values()
            .filter_map(|(thread, started)| {
                let busy_for = now.saturating_duration_since(*started);
                (busy_for >= threshold).then(|| BusyWorker {
                    thread: thread.clone(),
                    busy_for,
                })
            })
            .collect()
    }
}

pub(crate) struct Scheduler {
    normal: Sender<ReadyActor>,
    blocking: Sender<ReadyActor>,
    workers: Mutex<Vec<(PoolKind, JoinHandle<()>)>>,
    activity: Activity,
}

/// Receiving halves handed to the pools once the system exists.
pub(crate) struct ReadyReceivers {
    normal: Receiver<ReadyActor>,
    blocking: Receiver<ReadyActor>,
}

impl Scheduler {
    pub fn new() -> (Self, ReadyReceivers) {
        let (normal, normal_rx) = crossbeam_channel::unbounded();
        let (blocking, blocking_rx) = crossbeam_channel::unbounded();
        let scheduler = Self {
            normal,
            blocking,
            workers: Mutex::new(Vec::new()),
            activity: Activity::default(),
        };
        let receivers = ReadyReceivers {
            normal: normal_rx,
            blocking: blocking_rx,
        };
        (scheduler, receivers)
    }

    /// Spawn both pools, sized from `config`.
    pub fn spawn_pools(
        &self,
        config: &RuntimeConfig,
        system: WeakSystem,
        receivers: ReadyReceivers,
    ) -> std::io::Result<()> {
        let pools = [
            (PoolKind::Normal, config.normal_pool_size(), receivers.normal),
            (
                PoolKind::Blocking,
                config.blocking_pool_size(),
                receivers.blocking,
            ),
        ];
        for (kind, size, ready) in pools {
            tracing::info!(system = %config.name, pool = ?kind, size, "starting worker pool");
            for index in 0..size {
                let name = match kind {
                    PoolKind::Normal => format!("{}-worker-{index}", config.name),
                    PoolKind::Blocking => format!("{}-blocking-{index}", config.name),
                };
                let worker = Worker {
                    kind,
                    system: system.clone(),
                    ready: ready.clone(),
                    idle_backoff: config.idle_backoff,
                };
                let handle = thread::Builder::new().name(name).spawn(move || worker.run())?;
                self.workers.lock().push((kind, handle));
            }
        }
        Ok(())
    }

    pub fn schedule(&self, actor: ReadyActor) {
        let queue = if actor.uses_blocking_pool() {
            &self.blocking
        } else {
            &self.normal
        };
        if let Err(err) = queue.send(actor) {
            tracing::warn!(actor = %err.0.id(), "ready queue has no workers left");
        }
    }

    pub fn busy_longer_than(&self, threshold: Duration) -> Vec<BusyWorker> {
        self.activity.busy_longer_than(threshold)
    }

    /// Wait for the workers to leave their loops, giving each pool
    /// `drain_timeout` to finish the batch it is on.
    ///
    /// Workers still busy when their pool's time runs out are abandoned. The
    /// calling thread is skipped when it is itself a worker.
    pub fn stop(&self, drain_timeout: Duration) {
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for kind in [PoolKind::Normal, PoolKind::Blocking] {
            let deadline = Instant::now() + drain_timeout;
            for (_, handle) in workers.iter().filter(|(pool, _)| *pool == kind) {
                if handle.thread().id() == current {
                    continue;
                }
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(JOIN_POLL_INTERVAL);
                }
                if !handle.is_finished() {
                    tracing::warn!(
                        pool = ?kind,
                        thread = handle.thread().name().unwrap_or("unnamed"),
                        "worker did not stop within the drain timeout, abandoning it"
                    );
                }
            }
        }
        for (kind, handle) in workers {
            if handle.thread().id() != current && handle.is_finished() && handle.join().is_err() {
                tracing::warn!(pool = ?kind, "worker thread ended with a panic");
            }
        }
    }
}

struct Worker {
    kind: PoolKind,
    system: WeakSystem,
    ready: Receiver<ReadyActor>,
    idle_backoff: Duration,
}

impl Worker {
    fn run(self) {
        tracing::debug!(pool = ?self.kind, "starting event handling thread");
        loop {
            let actor = match self.ready.recv_timeout(self.idle_backoff) {
                Ok(actor) => actor,
                Err(RecvTimeoutError::Timeout) => match self.system.upgrade() {
                    Some(system) if system.is_running() => continue,
                    _ => break,
                },
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let Some(system) = self.system.upgrade() else {
                break;
            };
            if !system.is_running() {
                break;
            }

            let track = self.kind == PoolKind::Normal;
            if track {
                system.scheduler().activity.mark_start();
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| actor.drain_batch(&system)));
            if track {
                system.scheduler().activity.mark_stop();
            }

            match outcome {
                Ok(Ok(Drained::Idle)) => {}
                Ok(Ok(Drained::Requeue)) => system.scheduler().schedule(actor),
                Ok(Ok(Drained::Terminated)) => {
                    system.remove(actor.id());
                }
                Ok(Err(fatal)) => {
                    tracing::error!(pool = ?self.kind, %fatal, "fatal fault, shutting the system down");
                    system.shutdown();
                    break;
                }
                Err(panic) => {
                    tracing::error!(
                        pool = ?self.kind,
                        actor = %actor.id(),
                        reason = %panic_reason(panic.as_ref()),
                        "worker recovered from a fault while draining an actor"
                    );
                }
            }
        }
        tracing::debug!(pool = ?self.kind, "terminating event handling thread");
    }
}
