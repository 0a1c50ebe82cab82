use mlosim_core::{EventQueue, SimError, SimTime};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn drain(queue: &mut EventQueue<&'static str>, stop: SimTime) -> Vec<(SimTime, &'static str)> {
    let mut fired = Vec::new();
    queue
        .run_until(stop, |_, event| {
            fired.push((event.time, event.payload));
            Ok(())
        })
        .unwrap();
    fired
}

#[test]
fn test_events_fire_in_time_order() {
    let mut q = EventQueue::new();
    q.schedule(30, "c").unwrap();
    q.schedule(10, "a").unwrap();
    q.schedule(20, "b").unwrap();

    let fired = drain(&mut q, 100);
    assert_eq!(fired, vec![(10, "a"), (20, "b"), (30, "c")]);
    assert_eq!(q.now(), 100);
}

#[test]
fn test_ties_fire_in_insertion_order() {
    let mut q = EventQueue::new();
    q.schedule(5, "first").unwrap();
    q.schedule(5, "second").unwrap();
    q.schedule(5, "third").unwrap();
    q.schedule(1, "early").unwrap();

    let fired: Vec<_> = drain(&mut q, 10).into_iter().map(|(_, p)| p).collect();
    assert_eq!(fired, vec!["early", "first", "second", "third"]);
}

#[test]
fn test_random_schedule_is_totally_ordered() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut q: EventQueue<u64> = EventQueue::new();
    for i in 0..2_000u64 {
        // Narrow range so plenty of events share a fire time.
        q.schedule(rng.gen_range(0..50), i).unwrap();
    }

    let mut fired = Vec::new();
    q.run_until(SimTime::MAX, |_, e| {
        fired.push((e.time, e.seq, e.payload));
        Ok(())
    })
    .unwrap();

    assert_eq!(fired.len(), 2_000);
    for pair in fired.windows(2) {
        let (t0, s0, _) = pair[0];
        let (t1, s1, _) = pair[1];
        assert!(t0 <= t1, "time went backwards: {t0} -> {t1}");
        if t0 == t1 {
            assert!(s0 < s1, "tie at {t0} broke insertion order");
        }
    }
}

#[test]
fn test_cancel_is_idempotent() {
    let mut q = EventQueue::new();
    let keep = q.schedule(1, "keep").unwrap();
    let drop = q.schedule(2, "drop").unwrap();
    assert_eq!(q.len(), 2);

    assert!(q.cancel(drop));
    assert!(!q.cancel(drop), "second cancel must be a no-op");
    assert!(!q.is_pending(drop));
    assert!(q.is_pending(keep));
    assert_eq!(q.len(), 1);

    let fired = drain(&mut q, 10);
    assert_eq!(fired, vec![(1, "keep")]);
    assert!(!q.cancel(keep), "cancelling a fired event does nothing");
}

#[test]
fn test_negative_delay_is_rejected() {
    let mut q: EventQueue<()> = EventQueue::new();
    let err = q.schedule(-1, ()).unwrap_err();
    assert!(matches!(err, SimError::InvalidDelay { delay: -1 }));
    assert!(q.is_empty());
}

#[test]
fn test_scheduling_in_the_past_is_a_causality_violation() {
    let mut q = EventQueue::new();
    q.schedule(100, "tick").unwrap();

    let mut outcome = None;
    q.run_until(1_000, |queue, event| {
        outcome = Some(queue.schedule_at(event.time - 1, "late"));
        Ok(())
    })
    .unwrap();

    match outcome {
        Some(Err(SimError::CausalityViolation { at: 99, now: 100 })) => {}
        other => panic!("expected causality violation, got {other:?}"),
    }
}

#[test]
fn test_run_until_boundary_is_inclusive() {
    let mut q = EventQueue::new();
    q.schedule(500, "at-stop").unwrap();
    let fired = drain(&mut q, 500);
    assert_eq!(fired, vec![(500, "at-stop")]);

    let mut q = EventQueue::new();
    q.schedule(500, "after-stop").unwrap();
    let fired = drain(&mut q, 499);
    assert!(fired.is_empty());
    assert_eq!(q.now(), 499);
    assert!(q.is_empty(), "events past the deadline are discarded");
}

#[test]
fn test_handler_can_chain_events_inside_the_deadline() {
    let mut q = EventQueue::new();
    q.schedule(0, 0u32).unwrap();

    let mut count = 0;
    let executed = q
        .run_until(95, |queue, event| {
            count += 1;
            queue.schedule(10, event.payload + 1)?;
            Ok(())
        })
        .unwrap();

    // Fires at 0, 10, ..., 90.
    assert_eq!(executed, 10);
    assert_eq!(count, 10);
    assert_eq!(q.now(), 95);
}

#[test]
fn test_peek_skips_cancelled_events() {
    let mut q = EventQueue::new();
    let first = q.schedule(1, "a").unwrap();
    q.schedule(2, "b").unwrap();
    q.cancel(first);
    assert_eq!(q.peek_time(), Some(2));
    assert_eq!(q.pop_until(1).map(|e| e.payload), None);
    assert_eq!(q.pop_until(2).map(|e| e.payload), Some("b"));
    assert_eq!(q.peek_time(), None);
}
