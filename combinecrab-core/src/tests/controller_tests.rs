use super::*;
use crate::error::classify;
use crate::trigger::CountTrigger;

fn controller_for(max_count: u64) -> (Arc<CountTrigger>, AdaptiveController) {
    let trigger = Arc::new(CountTrigger::new(max_count).unwrap());
    let controller = AdaptiveController::new(trigger.clone(), 0);
    (trigger, controller)
}

// ── GlobalState ───────────────────────────────────────────────────────────────

#[test]
fn test_new_state_flags() {
    let state = GlobalState::new();
    assert!(state.is_validated());
    assert!(!state.is_overloaded());
    assert_eq!(state.interval_current(), None);
    assert_eq!(state.interval_new(), None);
}

#[test]
fn test_interval_current_is_set_once() {
    let mut state = GlobalState::new();
    assert!(state.set_interval_current(100));
    assert!(!state.set_interval_current(200));
    assert_eq!(state.interval_current(), Some(100));
}

#[test]
fn test_increment_sets_pending_to_current_plus_delta() {
    let mut state = GlobalState::new();
    state.set_interval_current(100);
    assert_eq!(state.increment_interval_new(25), Some(125));
    assert_eq!(state.interval_new(), Some(125));
}

#[test]
fn test_second_adjustment_before_consume_is_noop() {
    let mut state = GlobalState::new();
    state.set_interval_current(100);
    assert_eq!(state.increment_interval_new(25), Some(125));
    assert_eq!(state.increment_interval_new(50), Some(125));
    assert_eq!(state.decrement_interval_new(10), Some(125));
    assert_eq!(state.interval_new(), Some(125));
}

#[test]
fn test_adjustment_without_baseline_is_noop() {
    let mut state = GlobalState::new();
    assert_eq!(state.increment_interval_new(5), None);
    assert_eq!(state.decrement_interval_new(5), None);
    assert!(!state.has_pending());
}

#[test]
fn test_consume_reopens_the_cycle() {
    let mut state = GlobalState::new();
    state.set_interval_current(10);
    state.decrement_interval_new(4);
    assert_eq!(state.consume(), Some(6));
    assert_eq!(state.interval_new(), None);
    assert_eq!(state.consume(), None);

    assert_eq!(state.increment_interval_new(5), Some(15));
}

#[test]
fn test_flags_are_mutable() {
    let mut state = GlobalState::new();
    state.set_validated(false);
    state.set_overloaded(true);
    assert!(!state.is_validated());
    assert!(state.is_overloaded());
}

// ── parse_adjustment ──────────────────────────────────────────────────────────

#[test]
fn test_parse_adjustment_accepts_signed_integers() {
    assert_eq!(parse_adjustment(b"10").unwrap(), 10);
    assert_eq!(parse_adjustment(b"-3").unwrap(), -3);
    assert_eq!(parse_adjustment(b"  42\n").unwrap(), 42);
}

#[test]
fn test_parse_adjustment_rejects_garbage() {
    for payload in [&b"ten"[..], b"", b"1.5", &[0xff, 0xfe]] {
        let err = parse_adjustment(payload).unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(PreAggregateError::InvalidAdjustment(_))
        ));
    }
}

// ── AdaptiveController ────────────────────────────────────────────────────────

#[test]
fn test_adjustment_lowers_threshold() {
    let (trigger, controller) = controller_for(5);
    let outcome = controller.on_adjustment(-3);
    assert_eq!(
        outcome,
        AdjustmentOutcome::Applied {
            previous: 5,
            current: 2
        }
    );
    assert_eq!(trigger.max_count(), 2);
    assert_eq!(controller.state().interval_current(), Some(5));
    assert_eq!(controller.state().interval_new(), None);
}

#[test]
fn test_repeated_adjustments_are_accepted_after_consume() {
    let (trigger, controller) = controller_for(100);
    controller.on_adjustment(50);
    assert_eq!(trigger.max_count(), 150);

    controller.on_adjustment(-40);
    assert_eq!(trigger.max_count(), 60);
}

#[test]
fn test_duplicate_message_is_idempotent() {
    let (trigger, controller) = controller_for(100);
    assert!(matches!(
        controller.on_adjustment(20),
        AdjustmentOutcome::Applied { .. }
    ));
    assert_eq!(
        controller.on_adjustment(20),
        AdjustmentOutcome::Unchanged(120)
    );
    assert_eq!(trigger.max_count(), 120);
}

#[test]
fn test_propose_guards_until_applied() {
    let (trigger, controller) = controller_for(10);
    assert_eq!(controller.propose(5), AdjustmentOutcome::Pending(15));
    assert_eq!(
        controller.propose(-5),
        AdjustmentOutcome::DuplicateIgnored(15)
    );
    assert_eq!(trigger.max_count(), 10);

    assert_eq!(
        controller.apply_pending(),
        Some(AdjustmentOutcome::Applied {
            previous: 10,
            current: 15
        })
    );
    assert_eq!(controller.apply_pending(), None);
    assert_eq!(controller.propose(-5), AdjustmentOutcome::Pending(5));
}

#[test]
fn test_non_positive_result_is_rejected_and_consumed() {
    let (trigger, controller) = controller_for(5);
    assert_eq!(controller.on_adjustment(-5), AdjustmentOutcome::Rejected(0));
    assert_eq!(trigger.max_count(), 5);
    assert!(!controller.state().has_pending());

    assert!(matches!(
        controller.on_adjustment(-2),
        AdjustmentOutcome::Applied { current: 3, .. }
    ));
}

#[test]
fn test_rejected_outcome_reports_computed_threshold() {
    let (trigger, controller) = controller_for(5);
    assert_eq!(controller.on_adjustment(-16), AdjustmentOutcome::Rejected(-11));
    assert_eq!(trigger.max_count(), 5);
    assert_eq!(trigger.count(), 0);
}

#[test]
fn test_on_payload_parses_and_applies() {
    let (trigger, controller) = controller_for(10);
    controller.on_payload(b"-7").unwrap();
    assert_eq!(trigger.max_count(), 3);
    assert!(controller.on_payload(b"fast").is_err());
    assert_eq!(trigger.max_count(), 3);
}

#[test]
fn test_identical_message_converges_independent_instances() {
    let (trigger_a, controller_a) = controller_for(50);
    let (trigger_b, controller_b) = controller_for(50);

    controller_a.on_adjustment(30);
    controller_b.on_adjustment(30);
    controller_b.on_adjustment(30);
    controller_a.on_adjustment(30);

    assert_eq!(trigger_a.max_count(), 80);
    assert_eq!(trigger_a.max_count(), trigger_b.max_count());
}

#[test]
fn test_baseline_saturates_for_thresholds_beyond_i64() {
    let (trigger, controller) = controller_for(5);
    trigger.set_max_count(u64::MAX, 0);

    assert_eq!(
        controller.on_adjustment(-10),
        AdjustmentOutcome::Applied {
            previous: u64::MAX,
            current: (i64::MAX - 10) as u64,
        }
    );
    assert_eq!(controller.state().interval_current(), Some(i64::MAX));
    assert_eq!(trigger.max_count(), (i64::MAX - 10) as u64);
}

#[test]
fn test_largest_accepted_threshold_stays_adjustable() {
    let (trigger, controller) = controller_for(crate::config::MAX_COUNT_LIMIT);
    assert!(matches!(
        controller.on_adjustment(-1),
        AdjustmentOutcome::Applied { .. }
    ));
    assert_eq!(trigger.max_count(), crate::config::MAX_COUNT_LIMIT - 1);
}
