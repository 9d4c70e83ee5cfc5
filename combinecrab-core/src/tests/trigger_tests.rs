use std::sync::Arc;
use std::thread;

use super::*;
use crate::error::classify;

fn feed(trigger: &CountTrigger, n: usize) -> Vec<TriggerResult> {
    (0..n)
        .map(|i| PreAggregateTrigger::<usize>::on_element(trigger, &i))
        .collect()
}

#[test]
fn test_zero_threshold_is_rejected_at_construction() {
    let err = CountTrigger::new(0).unwrap_err();
    assert!(matches!(
        classify(&err),
        Some(PreAggregateError::Configuration(_))
    ));
}

#[test]
fn test_threshold_beyond_signed_range_is_rejected_at_construction() {
    let err = CountTrigger::new(u64::MAX).unwrap_err();
    assert!(matches!(
        classify(&err),
        Some(PreAggregateError::Configuration(_))
    ));
    assert!(CountTrigger::new(crate::config::MAX_COUNT_LIMIT).is_ok());
}

#[test]
fn test_fires_every_max_count_elements() {
    let trigger = CountTrigger::new(3).unwrap();
    let results = feed(&trigger, 7);
    assert_eq!(
        results,
        vec![
            TriggerResult::Continue,
            TriggerResult::Continue,
            TriggerResult::Fire,
            TriggerResult::Continue,
            TriggerResult::Continue,
            TriggerResult::Fire,
            TriggerResult::Continue,
        ]
    );
    assert_eq!(trigger.count(), 1);
}

#[test]
fn test_threshold_of_one_fires_on_every_element() {
    let trigger = CountTrigger::new(1).unwrap();
    assert!(feed(&trigger, 4).iter().all(|r| r.is_fire()));
    assert_eq!(trigger.count(), 0);
}

#[test]
fn test_time_trigger_fires_unconditionally_and_resets() {
    let trigger = CountTrigger::new(10)
        .unwrap()
        .with_max_time(Duration::from_millis(100));
    feed(&trigger, 4);
    assert_eq!(trigger.count(), 4);

    assert_eq!(trigger.time_trigger(), TriggerResult::Fire);
    assert_eq!(trigger.count(), 0);
    assert_eq!(trigger.time_trigger(), TriggerResult::Fire);
}

#[test]
fn test_set_max_count_applies_new_value() {
    let trigger = CountTrigger::new(5).unwrap();
    assert!(trigger.set_max_count(2, 0));
    assert_eq!(trigger.max_count(), 2);
}

#[test]
fn test_set_max_count_ignores_zero_and_same_value() {
    let trigger = CountTrigger::new(5).unwrap();
    assert!(!trigger.set_max_count(0, 0));
    assert_eq!(trigger.max_count(), 5);
    assert!(!trigger.set_max_count(5, 0));
    assert_eq!(trigger.max_count(), 5);
}

#[test]
fn test_lowered_threshold_takes_effect_on_next_elements() {
    let trigger = CountTrigger::new(5).unwrap();
    trigger.set_max_count(2, 0);
    assert_eq!(
        feed(&trigger, 2),
        vec![TriggerResult::Continue, TriggerResult::Fire]
    );
}

#[test]
fn test_lowering_below_current_count_fires_on_next_element() {
    let trigger = CountTrigger::new(10).unwrap();
    feed(&trigger, 6);
    trigger.set_max_count(3, 0);
    assert_eq!(feed(&trigger, 1), vec![TriggerResult::Fire]);
}

#[test]
fn test_from_config_carries_strategy_and_time() {
    let config = PreAggregateConfig::new(8)
        .with_strategy(PreAggregateStrategy::Local)
        .with_max_time(Duration::from_millis(500));
    let trigger = CountTrigger::from_config(&config).unwrap();
    assert_eq!(trigger.max_count(), 8);
    assert_eq!(trigger.strategy(), PreAggregateStrategy::Local);
    assert_eq!(trigger.max_time(), Some(Duration::from_millis(500)));
}

#[test]
fn test_explain() {
    let trigger = CountTrigger::new(4).unwrap();
    assert_eq!(trigger.explain(), "maxCount [4] strategy [GLOBAL]");
    let timed = CountTrigger::new(4)
        .unwrap()
        .with_max_time(Duration::from_millis(50));
    assert_eq!(
        timed.explain(),
        "maxCount [4] maxTime [50ms] strategy [GLOBAL]"
    );
}

#[test]
fn test_concurrent_threshold_updates_while_counting() {
    let trigger = Arc::new(CountTrigger::new(1_000).unwrap());

    let updater = {
        let trigger = Arc::clone(&trigger);
        thread::spawn(move || {
            for value in 1..=200u64 {
                trigger.set_max_count(value, 0);
            }
        })
    };

    let mut fires = 0;
    for i in 0..10_000usize {
        if PreAggregateTrigger::<usize>::on_element(trigger.as_ref(), &i).is_fire() {
            fires += 1;
        }
    }
    updater.join().unwrap();

    assert_eq!(trigger.max_count(), 200);
    assert!(fires > 0);
    assert!(trigger.count() < 10_000);
}
