use assert_matches::assert_matches;

use super::*;

fn named(name: &str) -> Message {
    Message::new(name)
}

#[test]
fn test_first_enqueue_schedules() {
    let mailbox = Mailbox::new();
    assert_eq!(mailbox.state(), ActorState::Idle);

    assert_matches!(mailbox.enqueue(named("a")), Enqueued::Schedule);
    assert_eq!(mailbox.state(), ActorState::Queued);
    assert_matches!(mailbox.enqueue(named("b")), Enqueued::Pending);
    assert_eq!(mailbox.len(), 2);
}

#[test]
fn test_batch_settles_by_remaining_work() {
    let mailbox = Mailbox::new();
    mailbox.enqueue(named("a"));
    mailbox.enqueue(named("b"));

    assert_eq!(mailbox.next().unwrap().name(), "a");
    assert_eq!(mailbox.state(), ActorState::Processing);
    // Arrivals while processing never ask for another schedule.
    assert_matches!(mailbox.enqueue(named("c")), Enqueued::Pending);

    assert_matches!(mailbox.settle(), Drained::Requeue);
    assert_eq!(mailbox.state(), ActorState::Queued);

    assert_eq!(mailbox.next().unwrap().name(), "b");
    assert_eq!(mailbox.next().unwrap().name(), "c");
    assert!(mailbox.next().is_none());
    assert_matches!(mailbox.settle(), Drained::Idle);
    assert_eq!(mailbox.state(), ActorState::Idle);
}

#[test]
fn test_finalize_jumps_the_queue_and_discards() {
    let mailbox = Mailbox::new();
    for name in ["a", "b", "c"] {
        mailbox.enqueue(named(name));
    }

    assert_matches!(
        mailbox.request_finalize(named(Message::FINALIZE)),
        Enqueued::Pending
    );
    assert_eq!(mailbox.state(), ActorState::Terminating);
    assert_eq!(mailbox.len(), 0);
    assert_matches!(mailbox.enqueue(named("d")), Enqueued::Dropped);
    assert_matches!(
        mailbox.request_finalize(named(Message::FINALIZE)),
        Enqueued::Dropped
    );

    assert_eq!(mailbox.next().unwrap().name(), Message::FINALIZE);
    assert!(mailbox.next().is_none());
    assert_matches!(mailbox.settle(), Drained::Terminated);
}

#[test]
fn test_finalize_on_idle_actor_schedules() {
    let mailbox = Mailbox::new();
    assert_matches!(
        mailbox.request_finalize(named(Message::FINALIZE)),
        Enqueued::Schedule
    );
}

#[test]
fn test_late_finalize_requeues() {
    let mailbox = Mailbox::new();
    mailbox.enqueue(named("a"));
    mailbox.next();

    mailbox.request_finalize(named(Message::FINALIZE));
    assert_matches!(mailbox.settle(), Drained::Requeue);
    assert_eq!(mailbox.next().unwrap().name(), Message::FINALIZE);
    assert_matches!(mailbox.settle(), Drained::Terminated);
}

#[test]
fn test_terminate_counts_discarded() {
    let mailbox = Mailbox::new();
    mailbox.enqueue(named("a"));
    mailbox.enqueue(named("b"));
    mailbox.next();

    assert_eq!(mailbox.terminate(), 1);
    assert!(mailbox.is_terminating());
    assert!(mailbox.next().is_none());
}

#[test]
fn test_routes() {
    let mailbox = Mailbox::new();
    assert_eq!(mailbox.route("Telemetry"), None);

    mailbox.set_route("Telemetry", Some(ActorId::new(9)));
    assert_eq!(mailbox.route("Telemetry"), Some(ActorId::new(9)));
    assert_eq!(mailbox.route("Odometry"), None);

    mailbox.set_route("Telemetry", None);
    assert_eq!(mailbox.route("Telemetry"), None);
}
