use std::time::Duration;

use crate::message::Message;
use crate::test_utils::*;

#[test_log::test]
fn test_repeating_timer_until_cancelled() {
    let system = test_system("ticks");
    let (recorder, recording) = Recorder::new(["Tick"]);
    let actor = system.create(recorder).unwrap();

    let timer = system.start_timer(actor, Duration::from_millis(50), Message::new("Tick"), true);
    std::thread::sleep(Duration::from_millis(220));
    assert!(recording.wait_for("Tick", 4));

    assert!(system.cancel_timer(timer));
    // A firing that raced the cancel may still be in the mailbox.
    std::thread::sleep(Duration::from_millis(20));
    let fired = recording.count("Tick");
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(recording.count("Tick"), fired);
    assert_eq!(system.active_timers(), 0);
    system.shutdown();
}

#[test_log::test]
fn test_cancel_is_idempotent() {
    let system = test_system("cancel");
    let (recorder, recording) = Recorder::new(["Tick"]);
    let actor = system.create(recorder).unwrap();

    let timer = system.start_timer(actor, Duration::from_millis(30), Message::new("Tick"), false);
    assert!(system.cancel_timer(timer));
    assert!(!system.cancel_timer(timer));

    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(recording.count("Tick"), 0);
    system.shutdown();
}

#[test_log::test]
fn test_one_shot_timer_fires_once_and_deregisters() {
    let system = test_system("one-shot");
    let (recorder, recording) = Recorder::new(["Wake"]);
    let actor = system.create(recorder).unwrap();

    let timer = system.start_timer(actor, Duration::from_millis(10), Message::new("Wake"), false);
    assert!(recording.wait_for("Wake", 1));
    assert!(wait_until(WAIT_TIMEOUT, || system.active_timers() == 0));
    assert!(!system.cancel_timer(timer));

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(recording.count("Wake"), 1);
    assert_eq!(recording.messages()[0].original_recipient(), Some(actor));
    system.shutdown();
}

#[test_log::test]
fn test_timer_cancels_itself_when_target_is_gone() {
    let system = test_system("orphan");
    let (recorder, recording) = Recorder::new(["Tick"]);
    let actor = system.create(recorder).unwrap();

    system.start_timer(actor, Duration::from_millis(5), Message::new("Tick"), true);
    assert!(recording.wait_for("Tick", 1));
    assert!(system.shutdown_actor(actor, true));
    assert!(wait_until(WAIT_TIMEOUT, || !system.contains(actor)));

    assert!(wait_until(WAIT_TIMEOUT, || system.active_timers() == 0));
    system.shutdown();
}

#[test_log::test]
fn test_timers_started_from_a_handler() {
    let system = test_system("context");
    let (recorder, recording) = Recorder::new(["Wake", "Never"]);
    let recorder = recorder.with_setup(|_, ctx| {
        ctx.start_timer(Duration::from_millis(5), Message::new("Wake"), false);
        let never = ctx.start_timer(Duration::from_millis(5), Message::new("Never"), false);
        assert!(ctx.cancel_timer(never));
        Ok(())
    });
    system.create(recorder).unwrap();

    assert!(recording.wait_for("Wake", 1));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(recording.count("Never"), 0);
    system.shutdown();
}

#[test_log::test]
fn test_no_timers_after_shutdown() {
    let system = test_system("late");
    system.shutdown();
    let timer = system.start_timer(
        crate::id::ActorId::new(3),
        Duration::from_millis(1),
        Message::new("Tick"),
        true,
    );
    assert_eq!(system.active_timers(), 0);
    assert!(!system.cancel_timer(timer));
}
