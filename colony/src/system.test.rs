use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Barrier};

use assert_matches::assert_matches;

use super::*;
use crate::actor::HandlerError;
use crate::test_utils::*;

#[test_log::test]
fn test_create_delivers_init_first() {
    let system = test_system("init");
    let (recorder, recording) = Recorder::new(["Ping"]);
    let actor = system.create(recorder).unwrap();
    // "Ping" is only subscribed by the Init handler.
    assert!(system.send(actor, Message::new("Ping"), actor));

    assert!(actor.get() >= ActorId::FIRST_GENERATED);
    assert!(system.contains(actor));
    assert!(recording.wait_for("Ping", 1));
    assert!(recording.is_initialized());
    system.shutdown();
}

#[test_log::test]
fn test_generated_ids_skip_explicit_ones() {
    let system = test_system("ids");
    let explicit = ActorId::new(ActorId::FIRST_GENERATED);
    system
        .create_with_id(explicit, Recorder::new(["Ping"]).0)
        .unwrap();
    system
        .create_with_id(ActorId::INIT, Recorder::new(["Ping"]).0)
        .unwrap();

    let generated = system.create(Recorder::new(["Ping"]).0).unwrap();
    assert_ne!(generated, explicit);
    assert_ne!(generated, ActorId::INIT);
    assert_eq!(system.actor_count(), 3);
    system.shutdown();
}

#[test_log::test]
fn test_duplicate_creation_is_illegal() {
    let system = test_system("duplicate");
    let id = ActorId::new(100);
    system.create_with_id(id, Recorder::new(["Ping"]).0).unwrap();

    let err = system
        .create_with_id(id, Recorder::new(["Ping"]).0)
        .unwrap_err();
    assert_matches!(err, SystemError::AlreadyRegistered(existing) if existing == id);
    assert!(err.is_illegal_state());
    system.shutdown();
}

#[test_log::test]
fn test_concurrent_creation_has_one_winner() {
    let system = test_system("race");
    let id = ActorId::new(500);
    let start = Arc::new(Barrier::new(8));

    let contenders: Vec<_> = (0..8)
        .map(|_| {
            let system = system.clone();
            let start = start.clone();
            std::thread::spawn(move || {
                start.wait();
                system.create_with_id(id, Recorder::new(["Ping"]).0)
            })
        })
        .collect();
    let results: Vec<_> = contenders
        .into_iter()
        .map(|contender| contender.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    for err in results.iter().filter_map(|result| result.as_ref().err()) {
        assert!(err.is_illegal_state(), "unexpected error {err}");
    }
    assert_eq!(system.actor_count(), 1);
    system.shutdown();
}

#[test_log::test]
fn test_messages_from_one_sender_arrive_in_order() {
    let system = test_system("fifo");
    let (recorder, recording) = Recorder::new(["Seq"]);
    let actor = system.create(recorder).unwrap();

    for n in 0..200 {
        let message = Message::with_payload("Seq", serde_json::json!(n));
        assert!(system.send(actor, message, actor));
    }
    assert!(recording.wait_for("Seq", 200));

    let seen: Vec<i64> = recording
        .messages()
        .iter()
        .map(|message| message.decode().unwrap())
        .collect();
    assert_eq!(seen, (0..200).collect::<Vec<i64>>());
    system.shutdown();
}

#[test_log::test]
fn test_handlers_never_overlap() {
    let system = test_system("exclusive");
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));

    let (recorder, _) = Recorder::new(Vec::<String>::new());
    let recorder = {
        let (busy, overlaps, handled) = (busy.clone(), overlaps.clone(), handled.clone());
        recorder.with_setup(move |_, ctx| {
            ctx.subscribe("Work", move |_, _, _| {
                if busy.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::yield_now();
                busy.store(false, Ordering::SeqCst);
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        })
    };
    let actor = system.create(recorder).unwrap();

    let senders: Vec<_> = (0..4)
        .map(|_| {
            let system = system.clone();
            std::thread::spawn(move || {
                for _ in 0..250 {
                    system.send(actor, Message::new("Work"), actor);
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    assert!(wait_until(WAIT_TIMEOUT, || handled.load(Ordering::SeqCst) == 1000));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    system.shutdown();
}

#[test_log::test]
fn test_routing_resolves_one_hop() {
    let system = test_system("routing");
    let (logger, logged) = Recorder::new(["Telemetry"]);
    let logger = system.create(logger).unwrap();
    let (sink, sunk) = Recorder::new(["Telemetry"]);
    let sink = system.create(sink).unwrap();
    let (drive, driven) = Recorder::new(["Telemetry", "Odometry"]);
    let drive = system.create(drive).unwrap();

    assert!(system.set_route(drive, "Telemetry", Some(logger)));
    // Only the target's own table is consulted.
    assert!(system.set_route(logger, "Telemetry", Some(sink)));
    assert_eq!(system.resolve_target(drive, "Telemetry"), Some(logger));

    assert!(system.send(drive, Message::new("Telemetry"), drive));
    assert!(system.send(drive, Message::new("Odometry"), drive));
    assert!(logged.wait_for("Telemetry", 1));
    assert!(driven.wait_for("Odometry", 1));

    let routed = &logged.messages()[0];
    assert_eq!(routed.original_recipient(), Some(drive));
    assert_eq!(driven.count("Telemetry"), 0);
    assert_eq!(sunk.count("Telemetry"), 0);
    system.shutdown();
}

#[test_log::test]
fn test_route_to_missing_actor_falls_back() {
    let system = test_system("fallback");
    let (drive, driven) = Recorder::new(["Telemetry"]);
    let drive = system.create(drive).unwrap();

    system.set_route(drive, "Telemetry", Some(ActorId::new(9999)));
    assert!(system.send(drive, Message::new("Telemetry"), drive));
    assert!(driven.wait_for("Telemetry", 1));

    system.set_route(drive, "Telemetry", None);
    assert_eq!(system.resolve_target(drive, "Telemetry"), Some(drive));
    assert!(!system.set_route(ActorId::new(9999), "Telemetry", None));
    system.shutdown();
}

#[test_log::test]
fn test_reserved_messages_are_not_routed() {
    let system = test_system("reserved");
    let (other, other_recording) = Recorder::new(Vec::<String>::new());
    let other = system.create(other).unwrap();
    let (actor, recording) = Recorder::new(Vec::<String>::new());
    let actor = system.create(actor).unwrap();

    system.set_route(actor, Message::FINALIZE, Some(other));
    assert!(system.shutdown_actor(actor, false));
    assert!(recording.wait_for_finalize());
    assert!(!other_recording.is_finalized());
    system.shutdown();
}

#[test_log::test]
fn test_graceful_shutdown_drains_first() {
    let system = test_system("grace");
    let (recorder, recording) = Recorder::new(["Work"]);
    let actor = system.create(recorder).unwrap();

    assert!(system.shutdown_actor(actor, false));
    for _ in 0..3 {
        assert!(system.send(actor, Message::new("Work"), actor));
    }
    assert!(recording.wait_for_finalize());
    assert_eq!(recording.count("Work"), 3);
    assert!(wait_until(WAIT_TIMEOUT, || !system.contains(actor)));
    assert!(!system.send(actor, Message::new("Work"), actor));
    assert!(!system.shutdown_actor(actor, false));
    system.shutdown();
}

#[test_log::test]
fn test_blocking_actors_run_on_the_blocking_pool() {
    let system = test_system("pools");
    let (recorder, recording) = Recorder::new(Vec::<String>::new());
    let threads = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorder = {
        let threads = threads.clone();
        recorder.blocking().with_setup(move |_, ctx| {
            ctx.subscribe("Read", move |recorder, _, message| {
                let name = std::thread::current().name().map(str::to_string);
                threads.lock().push(name);
                recorder.recording().record(message);
                Ok(())
            });
            Ok(())
        })
    };
    let actor = system.create(recorder).unwrap();
    system.send(actor, Message::new("Read"), actor);
    assert!(recording.wait_for("Read", 1));

    let threads = threads.lock();
    let name = threads[0].as_deref().unwrap();
    assert!(name.starts_with("pools-blocking-"), "ran on {name}");
    system.shutdown();
}

#[test_log::test]
fn test_fatal_fault_shuts_the_system_down() {
    let system = test_system("fatal");
    let (recorder, _) = Recorder::new(Vec::<String>::new());
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.subscribe("Estop", |_, _, _| Err(HandlerError::fatal("emergency stop")));
        Ok(())
    });
    let actor = system.create(recorder).unwrap();

    system.send(actor, Message::new("Estop"), actor);
    assert!(system.wait_for_shutdown_timeout(WAIT_TIMEOUT));
    assert!(!system.is_running());
}

#[test_log::test]
fn test_ordinary_fault_keeps_running() {
    let system = test_system("fault");
    let (recorder, recording) = Recorder::new(["Next"]);
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.subscribe("Bad", |_, _, message| {
            let _: u64 = message.decode()?;
            Ok(())
        });
        Ok(())
    });
    let actor = system.create(recorder).unwrap();

    system.send(actor, Message::new("Bad"), actor);
    system.send(actor, Message::new("Next"), actor);
    assert!(recording.wait_for("Next", 1));
    assert!(system.is_running());
    system.shutdown();
}

#[test_log::test]
fn test_handler_panic_keeps_running() {
    let system = test_system("panic");
    let (recorder, faulty) = Recorder::new(["Next"]);
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.subscribe("Index", |_, _, _| {
            let readings: Vec<u32> = Vec::new();
            let _ = readings[0];
            Ok(())
        });
        ctx.subscribe("Index", |recorder, _, message| {
            recorder.recording().record(message);
            Ok(())
        });
        Ok(())
    });
    let actor = system.create(recorder).unwrap();
    let (bystander, bystanding) = Recorder::new(["Ping"]);
    let bystander = system.create(bystander).unwrap();

    assert!(system.send(actor, Message::new("Index"), actor));
    assert!(system.send(actor, Message::new("Next"), actor));
    assert!(faulty.wait_for("Next", 1));
    assert_eq!(faulty.names(), vec!["Index", "Next"]);

    assert!(system.send(bystander, Message::new("Ping"), actor));
    assert!(bystanding.wait_for("Ping", 1));
    assert!(system.is_running());
    assert!(system.contains(actor));
    system.shutdown();
}

#[test_log::test]
fn test_creation_racing_shutdown_is_discarded() {
    let system = test_system("late-create");
    let id = ActorId::new(42);
    system.reserve(id).unwrap();
    system.shutdown();

    let (recorder, recording) = Recorder::new(["Ping"]);
    assert_matches!(
        system.register(id, recorder, Instant::now()),
        Err(SystemError::NotRunning)
    );
    assert!(!system.contains(id));
    assert_eq!(system.actor_count(), 0);
    assert!(!recording.is_initialized());
}

#[test_log::test]
fn test_no_actor_survives_a_concurrent_shutdown() {
    let system = test_system("create-storm");
    let start = Arc::new(Barrier::new(5));
    let creators: Vec<_> = (0..4)
        .map(|_| {
            let system = system.clone();
            let start = start.clone();
            std::thread::spawn(move || {
                start.wait();
                while system.create(Recorder::new(["Ping"]).0).is_ok() {}
            })
        })
        .collect();

    start.wait();
    std::thread::sleep(Duration::from_millis(5));
    system.shutdown();
    for creator in creators {
        creator.join().unwrap();
    }
    assert_eq!(system.actor_count(), 0);
}

#[test_log::test]
fn test_stats_flush() {
    let system = test_system("stats");
    let (recorder, recording) = Recorder::new(["Ping"]);
    let actor = system.create(recorder).unwrap();
    system.send(actor, Message::new("Ping"), actor);
    let timer = system.start_timer(actor, Duration::from_secs(60), Message::new("Ping"), false);
    assert!(system.cancel_timer(timer));
    assert!(recording.wait_for("Ping", 1));

    let report = system.flush_stats();
    assert_eq!(report.get("system.create").unwrap().samples, 1);
    assert!(report.get("system.send").unwrap().samples >= 1);
    assert_eq!(report.get("system.start_timer").unwrap().samples, 1);
    assert_eq!(report.get("system.cancel_timer").unwrap().samples, 1);
    assert!(system.flush_stats().stats.is_empty());
    system.shutdown();
}

#[test_log::test]
fn test_long_batches_are_reported() {
    let system = test_system_with(RuntimeConfig {
        long_batch_warning: Duration::from_millis(20),
        ..RuntimeConfig::named("activity")
    });
    let release = Arc::new(Barrier::new(2));
    let (recorder, recording) = Recorder::new(Vec::<String>::new());
    let recorder = {
        let release = release.clone();
        recorder.with_setup(move |_, ctx| {
            ctx.subscribe("Crunch", move |_, _, _| {
                release.wait();
                Ok(())
            });
            Ok(())
        })
    };
    let actor = system.create(recorder).unwrap();
    assert!(wait_until(WAIT_TIMEOUT, || recording.is_initialized()));
    assert!(system.check_thread_activity().is_empty());

    system.send(actor, Message::new("Crunch"), actor);
    assert!(wait_until(WAIT_TIMEOUT, || !system.check_thread_activity().is_empty()));
    let busy = system.check_thread_activity();
    assert!(busy[0].thread.starts_with("activity-worker-"));
    release.wait();

    assert!(wait_until(WAIT_TIMEOUT, || system.check_thread_activity().is_empty()));
    system.shutdown();
}

#[test_log::test]
fn test_config_from_properties_starts_a_system() {
    let properties = HashMap::from([
        ("name".to_string(), "props".to_string()),
        ("thread_pool_size".to_string(), "0".to_string()),
        ("blocking_thread_pool_size".to_string(), "99".to_string()),
    ]);
    let system = System::new(RuntimeConfig::from_properties(&properties)).unwrap();
    assert_eq!(system.name(), "props");
    assert_eq!(system.config().normal_pool_size(), 1);
    assert_eq!(system.config().blocking_pool_size(), 40);

    let (recorder, recording) = Recorder::new(["Ping"]);
    let actor = system.create(recorder).unwrap();
    system.send(actor, Message::new("Ping"), actor);
    assert!(recording.wait_for("Ping", 1));
    system.shutdown();
}

#[test_log::test]
fn test_dropping_the_last_handle_stops_workers() {
    let system = test_system("dropped");
    let weak = system.downgrade();
    drop(system);
    assert!(wait_until(WAIT_TIMEOUT, || weak.upgrade().is_none()));
}
