//! Helpers for testing actors against a real system.
//!
//! [`Recorder`] is an actor that records every message it is subscribed to,
//! and hands out a [`Recording`] the test keeps to inspect what arrived.
//! Everything runs on real worker threads, so assertions go through
//! [`wait_until`] instead of fixed sleeps.
//!
//! ```ignore
//! let system = test_system("recorder");
//! let (recorder, recording) = Recorder::new(["Ping"]);
//! let id = system.create(recorder).unwrap();
//! system.send(id, Message::new("Ping"), id);
//! assert!(recording.wait_for("Ping", 1));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::actor::{Actor, HandlerResult};
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::message::Message;
use crate::system::System;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A system with short grace and drain timeouts, suited to tests.
pub fn test_system(name: &str) -> System {
    test_system_with(RuntimeConfig {
        thread_pool_size: 4,
        blocking_thread_pool_size: 2,
        ..RuntimeConfig::named(name)
    })
}

pub fn test_system_with(config: RuntimeConfig) -> System {
    let config = RuntimeConfig {
        shutdown_grace: Duration::from_millis(50),
        drain_timeout: Duration::from_secs(2),
        ..config
    };
    System::new(config).expect("failed to start test system")
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

type Setup = Box<dyn FnOnce(&mut Recorder, &mut Context<'_, Recorder>) -> HandlerResult + Send>;

/// Actor that records every message whose name it was built with.
pub struct Recorder {
    names: Vec<String>,
    recording: Recording,
    setup: Option<Setup>,
    blocking: bool,
}

/// The test's view of a [`Recorder`].
#[derive(Clone, Default)]
pub struct Recording {
    messages: Arc<Mutex<Vec<Message>>>,
    initialized: Arc<AtomicBool>,
    finalized: Arc<AtomicBool>,
}

impl Recorder {
    pub fn new<I, S>(names: I) -> (Self, Recording)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let recording = Recording::default();
        let recorder = Self {
            names: names.into_iter().map(Into::into).collect(),
            recording: recording.clone(),
            setup: None,
            blocking: false,
        };
        (recorder, recording)
    }

    /// Run `setup` from `on_init`, after the recording handlers are subscribed.
    pub fn with_setup<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut Recorder, &mut Context<'_, Recorder>) -> HandlerResult + Send + 'static,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }
}

impl Actor for Recorder {
    fn on_init(&mut self, ctx: &mut Context<'_, Self>, _message: &Message) -> HandlerResult {
        for name in self.names.clone() {
            ctx.subscribe(name, |recorder, _ctx, message| {
                recorder.recording.record(message);
                Ok(())
            });
        }
        if let Some(setup) = self.setup.take() {
            setup(self, ctx)?;
        }
        self.recording.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_finalize(&mut self, _ctx: &mut Context<'_, Self>, _message: &Message) -> HandlerResult {
        self.recording.finalized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn uses_blocking_pool(&self) -> bool {
        self.blocking
    }
}

impl Recording {
    pub fn record(&self, message: &Message) {
        self.messages.lock().push(message.clone());
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|message| message.name() == name)
            .count()
    }

    /// Names of every recorded message, in arrival order.
    pub fn names(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|message| message.name().to_string())
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` messages named `name` were recorded.
    pub fn wait_for(&self, name: &str, count: usize) -> bool {
        wait_until(WAIT_TIMEOUT, || self.count(name) >= count)
    }

    pub fn wait_for_finalize(&self) -> bool {
        wait_until(WAIT_TIMEOUT, || self.is_finalized())
    }
}
