use assert_matches::assert_matches;

use super::*;
use crate::test_utils::*;

/// A cell that has already handled its Init, so its handlers are subscribed.
fn initialized(system: &System, recorder: Recorder) -> (ActorCell<Recorder>, Recording) {
    let recording = recorder.recording().clone();
    let cell = ActorCell::new(ActorId::new(77), recorder);
    assert_matches!(cell.enqueue(Message::init()), Enqueued::Schedule);
    assert_matches!(cell.drain_batch(system), Ok(Drained::Idle));
    assert!(recording.is_initialized());
    (cell, recording)
}

#[test_log::test]
fn test_batch_is_bounded() {
    let system = test_system("fairness");
    let (recorder, _) = Recorder::new(["Step"]);
    let (cell, recording) = initialized(&system, recorder);

    for _ in 0..15 {
        cell.enqueue(Message::new("Step"));
    }
    assert_matches!(cell.drain_batch(&system), Ok(Drained::Requeue));
    assert_eq!(recording.count("Step"), FAIRNESS_BATCH);
    assert_eq!(cell.state(), ActorState::Queued);
    assert_eq!(cell.queued(), 5);

    assert_matches!(cell.drain_batch(&system), Ok(Drained::Idle));
    assert_eq!(recording.count("Step"), 15);
    assert_eq!(cell.state(), ActorState::Idle);
    system.shutdown();
}

#[test_log::test]
fn test_failing_handler_does_not_stop_the_chain() {
    let system = test_system("fault");
    let (recorder, _) = Recorder::new(Vec::<String>::new());
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.subscribe("Measure", |_, _, _| Err(HandlerError::failed("sensor offline")));
        ctx.subscribe("Measure", |recorder, _, message| {
            recorder.recording().record(message);
            Ok(())
        });
        Ok(())
    });
    let (cell, recording) = initialized(&system, recorder);

    cell.enqueue(Message::new("Measure"));
    cell.enqueue(Message::new("Measure"));
    assert_matches!(cell.drain_batch(&system), Ok(Drained::Idle));
    assert_eq!(recording.count("Measure"), 2);
    system.shutdown();
}

#[test_log::test]
fn test_unsubscribed_message_is_ignored() {
    let system = test_system("unsubscribed");
    let (recorder, _) = Recorder::new(["Known"]);
    let (cell, recording) = initialized(&system, recorder);

    cell.enqueue(Message::new("Unknown"));
    cell.enqueue(Message::new("Known"));
    assert_matches!(cell.drain_batch(&system), Ok(Drained::Idle));
    assert_eq!(recording.names(), vec!["Known"]);
    system.shutdown();
}

#[test_log::test]
fn test_fatal_error_escalates() {
    let system = test_system("fatal");
    let (recorder, _) = Recorder::new(["After"]);
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.subscribe("Overheat", |_, _, _| Err(HandlerError::fatal("motor driver fault")));
        Ok(())
    });
    let (cell, recording) = initialized(&system, recorder);

    cell.enqueue(Message::new("Overheat"));
    cell.enqueue(Message::new("After"));
    let fatal = cell.drain_batch(&system).unwrap_err();
    assert_matches!(fatal, Fatal::Handler { ref message, .. } if message == "Overheat");
    assert_eq!(recording.count("After"), 0);
    // The remaining message is still there for whoever looks next.
    assert_eq!(cell.state(), ActorState::Queued);
    system.shutdown();
}

#[test_log::test]
fn test_panic_does_not_stop_the_chain() {
    let system = test_system("panic");
    let (recorder, _) = Recorder::new(["After"]);
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
    let (cell, recording) = initialized(&system, recorder);

    cell.enqueue(Message::new("Index"));
    cell.enqueue(Message::new("After"));
    assert_matches!(cell.drain_batch(&system), Ok(Drained::Idle));
    assert_eq!(recording.names(), vec!["Index", "After"]);
    assert_eq!(cell.state(), ActorState::Idle);
    assert!(system.is_running());
    system.shutdown();
}

#[test_log::test]
fn test_unwound_batch_settles_the_mailbox() {
    let system = test_system("unwind");
    let mailbox = Mailbox::new();
    assert_matches!(mailbox.enqueue(Message::new("First")), Enqueued::Schedule);
    assert_matches!(mailbox.enqueue(Message::new("Second")), Enqueued::Pending);
    assert!(mailbox.next().is_some());
    assert_eq!(mailbox.state(), ActorState::Processing);

    let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
        let _settle = SettleOnUnwind::new(ActorId::new(78), &mailbox, &system);
        panic!("batch machinery failed");
    }));
    assert!(unwound.is_err());
    // A message is still waiting, so the actor goes back on its queue.
    assert_eq!(mailbox.state(), ActorState::Queued);
    system.shutdown();
}

#[test_log::test]
fn test_unwound_empty_batch_goes_idle() {
    let system = test_system("unwind-idle");
    let mailbox = Mailbox::new();
    assert_matches!(mailbox.enqueue(Message::new("Only")), Enqueued::Schedule);
    assert!(mailbox.next().is_some());

    let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
        let _settle = SettleOnUnwind::new(ActorId::new(79), &mailbox, &system);
        panic!("batch machinery failed");
    }));
    assert!(unwound.is_err());
    assert_eq!(mailbox.state(), ActorState::Idle);
    assert_matches!(mailbox.enqueue(Message::new("Next")), Enqueued::Schedule);
    system.shutdown();
}

#[test]
fn test_finished_batch_settles_once() {
    let system = test_system("settle");
    let mailbox = Mailbox::new();
    mailbox.enqueue(Message::new("Only"));
    assert!(mailbox.next().is_some());

    let settle = SettleOnUnwind::new(ActorId::new(80), &mailbox, &system);
    assert_eq!(settle.finish(), Drained::Idle);
    assert_matches!(mailbox.enqueue(Message::new("Next")), Enqueued::Schedule);
    assert_eq!(mailbox.state(), ActorState::Queued);
    system.shutdown();
}

#[test_log::test]
fn test_stimuli_run_before_the_next_message() {
    let system = test_system("stimulate");
    let (recorder, _) = Recorder::new(["A", "B", "C", "D", "Z"]);
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.subscribe("A", |_, ctx, _| {
            ctx.stimulate(Message::new("B"));
            ctx.stimulate(Message::new("C"));
            Ok(())
        });
        ctx.subscribe("B", |_, ctx, _| {
            ctx.stimulate(Message::new("D"));
            Ok(())
        });
        Ok(())
    });
    let (cell, recording) = initialized(&system, recorder);

    cell.enqueue(Message::new("A"));
    cell.enqueue(Message::new("Z"));
    assert_matches!(cell.drain_batch(&system), Ok(Drained::Idle));
    assert_eq!(recording.names(), vec!["A", "B", "D", "C", "Z"]);
    system.shutdown();
}

#[test_log::test]
fn test_immediate_shutdown_from_a_handler() {
    let system = test_system("self-destruct");
    let (recorder, _) = Recorder::new(["Stop", "Later", "Echo"]);
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.subscribe("Stop", |_, ctx, _| {
            ctx.shutdown(true);
            ctx.stimulate(Message::new("Echo"));
            Ok(())
        });
        Ok(())
    });
    let (cell, recording) = initialized(&system, recorder);

    cell.enqueue(Message::new("Stop"));
    cell.enqueue(Message::new("Later"));
    assert_matches!(cell.drain_batch(&system), Ok(Drained::Terminated));
    assert_eq!(recording.names(), vec!["Stop"]);
    assert!(recording.is_finalized());
    assert_matches!(cell.enqueue(Message::new("Later")), Enqueued::Dropped);
    system.shutdown();
}

#[test]
fn test_self_route_is_ignored() {
    let system = test_system("self-route");
    let (recorder, _) = Recorder::new(["Ping"]);
    let (cell, _) = initialized(&system, recorder);

    cell.set_route("Ping", Some(ActorId::new(5)));
    assert_eq!(cell.route("Ping"), Some(ActorId::new(5)));
    cell.set_route("Ping", Some(cell.id()));
    assert_eq!(cell.route("Ping"), None);
    system.shutdown();
}

#[test]
fn test_panic_reason() {
    let payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
    assert_eq!(panic_reason(payload.as_ref()), "boom");
    let payload: Box<dyn Any + Send> = Box::new(42_u8);
    assert_eq!(panic_reason(payload.as_ref()), "unknown panic payload");
}
