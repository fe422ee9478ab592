//! An in-process actor scheduling runtime.
//!
//! Actors own a mailbox, a table of named message handlers and a routing
//! table. A [`System`](system::System) registers them, delivers messages and
//! runs them on two fixed-size worker pools, one for compute-bound actors and
//! one for actors that block. Each worker turn handles a bounded batch of
//! messages so no actor can monopolise a thread. A single timer thread
//! injects delayed and periodic messages.
pub mod actor;
mod cell;
pub mod completion;
pub mod config;
pub mod context;
pub mod id;
pub mod mailbox;
pub mod message;
pub mod prelude;
pub mod scheduler;
pub mod stats;
pub mod system;
#[cfg(test)]
mod test_utils;
mod timer;

pub use cell::FAIRNESS_BATCH;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use crate::test_utils::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[derive(serde::Deserialize)]
    struct Ping {
        n: u64,
    }

    #[test_log::test]
    fn test_ping_is_handled_once() {
        let system = test_system("ping");
        let (recorder, recording) = Recorder::new(["Ping"]);
        let actor = system.create(recorder).unwrap();

        let ping = Message::with_payload("Ping", serde_json::json!({ "n": 1 }));
        assert!(system.send(actor, ping, actor));
        assert!(recording.wait_for("Ping", 1));

        std::thread::sleep(Duration::from_millis(30));
        let messages = recording.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].decode::<Ping>().unwrap().n, 1);
        assert_eq!(messages[0].original_recipient(), Some(actor));
        system.shutdown();
    }

    #[test_log::test]
    fn test_send_to_unknown_actor_returns_false() {
        let system = test_system("unknown");
        let nobody = ActorId::new(4242);
        assert!(!system.send(nobody, Message::new("Ping"), nobody));
        assert!(!system.contains(nobody));
        system.shutdown();
    }

    #[test_log::test]
    fn test_immediate_shutdown_discards_queued_messages() {
        let system = test_system("discard");
        let gate = std::sync::Arc::new(std::sync::Barrier::new(2));
        let entered = gate.clone();
        let (recorder, recording) = Recorder::new(["Work"]);
        let recorder = recorder.with_setup(move |_, ctx| {
            ctx.subscribe("Hold", move |_, _, _| {
                entered.wait();
                entered.wait();
                Ok(())
            });
            Ok(())
        });
        let actor = system.create(recorder).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || recording.is_initialized()));

        // Park the actor inside a handler so the next five stay queued.
        assert!(system.send(actor, Message::new("Hold"), actor));
        gate.wait();
        for _ in 0..5 {
            assert!(system.send(actor, Message::new("Work"), actor));
        }
        assert_eq!(system.queued_messages(actor), Some(5));
        assert!(system.shutdown_actor(actor, true));
        assert!(!system.send(actor, Message::new("Work"), actor));
        gate.wait();

        assert!(recording.wait_for_finalize());
        assert!(wait_until(WAIT_TIMEOUT, || !system.contains(actor)));
        assert_eq!(recording.count("Work"), 0);
        system.shutdown();
    }

    #[test_log::test]
    fn test_shutdown_stops_everything() {
        let system = test_system("stop");
        let (recorder, recording) = Recorder::new(["Tick"]);
        let actor = system.create(recorder).unwrap();
        system.start_timer(actor, Duration::from_millis(5), Message::new("Tick"), true);
        assert!(recording.wait_for("Tick", 2));

        let waiter = {
            let system = system.clone();
            std::thread::spawn(move || system.wait_for_shutdown())
        };
        system.shutdown();
        waiter.join().unwrap();

        assert!(!system.is_running());
        assert_eq!(system.actor_count(), 0);
        assert!(system.wait_for_shutdown_timeout(Duration::from_millis(1)));
        assert_matches!(
            system.create(Recorder::new(["Ping"]).0),
            Err(SystemError::NotRunning)
        );
    }
}
