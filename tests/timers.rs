//! Timer engine behavior over many ticks

use std::num::NonZeroU32;

use proptest::prelude::*;
use sous_live::{TimerEngine, TimerStatus};

fn secs(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

#[test]
fn test_ten_minute_timer_finishes_exactly_once() {
    let mut engine = TimerEngine::new();
    let timer = engine.create("Pasta", secs(600));

    let mut finished = 0;
    for _ in 0..700 {
        finished += engine
            .tick()
            .iter()
            .filter(|t| t.id == timer.id)
            .count();
    }

    assert_eq!(finished, 1);
    let timer = engine.get(&timer.id).unwrap();
    assert_eq!(timer.remaining_seconds, 0);
    assert_eq!(timer.status, TimerStatus::Finished);
}

#[test]
fn test_finishes_on_the_last_tick() {
    let mut engine = TimerEngine::new();
    let timer = engine.create("Eggs", secs(3));

    assert!(engine.tick().is_empty());
    assert!(engine.tick().is_empty());
    let done = engine.tick();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, timer.id);
}

#[test]
fn test_paused_timer_does_not_advance() {
    let mut engine = TimerEngine::new();
    let timer = engine.create("Rice", secs(10));

    engine.tick();
    assert!(engine.pause(&timer.id));
    for _ in 0..20 {
        engine.tick();
    }
    assert_eq!(engine.get(&timer.id).unwrap().remaining_seconds, 9);
    assert_eq!(engine.get(&timer.id).unwrap().status, TimerStatus::Paused);

    assert!(engine.resume(&timer.id));
    engine.tick();
    assert_eq!(engine.get(&timer.id).unwrap().remaining_seconds, 8);
}

#[test]
fn test_pause_and_resume_require_matching_status() {
    let mut engine = TimerEngine::new();
    let timer = engine.create("Sauce", secs(5));

    assert!(!engine.resume(&timer.id));
    assert!(engine.pause(&timer.id));
    assert!(!engine.pause(&timer.id));
    assert!(!engine.pause("missing"));
}

#[test]
fn test_reset_restarts_a_finished_timer() {
    let mut engine = TimerEngine::new();
    let timer = engine.create("Toast", secs(2));
    engine.tick();
    engine.tick();
    assert_eq!(engine.get(&timer.id).unwrap().status, TimerStatus::Finished);

    assert!(engine.reset(&timer.id));
    let reset = engine.get(&timer.id).unwrap();
    assert_eq!(reset.remaining_seconds, 2);
    assert_eq!(reset.status, TimerStatus::Running);
}

#[test]
fn test_reset_forces_paused_timer_to_run() {
    let mut engine = TimerEngine::new();
    let timer = engine.create("Dough", secs(30));
    engine.tick();
    engine.pause(&timer.id);

    assert!(engine.reset(&timer.id));
    assert_eq!(engine.get(&timer.id).unwrap().status, TimerStatus::Running);
    assert_eq!(engine.get(&timer.id).unwrap().remaining_seconds, 30);
}

#[test]
fn test_delete_removes_timer() {
    let mut engine = TimerEngine::new();
    let a = engine.create("A", secs(5));
    let b = engine.create("B", secs(5));

    let removed = engine.delete(&a.id).unwrap();
    assert_eq!(removed.label, "A");
    assert!(engine.delete(&a.id).is_none());
    assert_eq!(engine.list().len(), 1);
    assert_eq!(engine.list()[0].id, b.id);
}

#[test]
fn test_ids_are_unique() {
    let mut engine = TimerEngine::new();
    let ids: std::collections::HashSet<_> =
        (0..50).map(|_| engine.create("x", secs(1)).id).collect();
    assert_eq!(ids.len(), 50);
}

proptest! {
    #[test]
    fn test_remaining_is_monotonic_and_bounded(duration in 1u32..200, ticks in 0usize..400) {
        let mut engine = TimerEngine::new();
        let timer = engine.create("Prop", NonZeroU32::new(duration).unwrap());

        let mut previous = duration;
        let mut finishes = 0;
        for _ in 0..ticks {
            finishes += engine.tick().len();
            let remaining = engine.get(&timer.id).unwrap().remaining_seconds;
            prop_assert!(remaining <= previous);
            prop_assert!(remaining <= duration);
            previous = remaining;
        }

        let expected = duration.saturating_sub(u32::try_from(ticks).unwrap());
        prop_assert_eq!(previous, expected);
        prop_assert_eq!(finishes, usize::from(ticks >= duration as usize));
    }
}
