use super::*;

#[test]
fn test_empty_snapshot() {
    let histogram = LatencyHistogram::new(4);
    let snapshot = histogram.snapshot();
    assert_eq!(snapshot.count(), 0);
    assert_eq!(snapshot.min(), None);
    assert_eq!(snapshot.mean(), None);
    assert_eq!(snapshot.percentile(0.5), None);
}

#[test]
fn test_window_evicts_oldest_samples() {
    let mut histogram = LatencyHistogram::new(3);
    for sample in [10, 20, 30, 40, 50] {
        histogram.update(sample);
    }
    assert_eq!(histogram.len(), 3);
    assert_eq!(histogram.last(), Some(50));

    let snapshot = histogram.snapshot();
    assert_eq!(snapshot.min(), Some(30));
    assert_eq!(snapshot.max(), Some(50));
    assert_eq!(snapshot.mean(), Some(40.0));
}

#[test]
fn test_percentiles_use_nearest_rank() {
    let mut histogram = LatencyHistogram::default();
    assert_eq!(histogram.window(), 500);
    for sample in (1..=100).rev() {
        histogram.update(sample);
    }
    let snapshot = histogram.snapshot();
    assert_eq!(snapshot.percentile(0.0), Some(1));
    assert_eq!(snapshot.percentile(0.5), Some(50));
    assert_eq!(snapshot.percentile(0.99), Some(99));
    assert_eq!(snapshot.percentile(1.0), Some(100));
}

#[test]
fn test_zero_window_keeps_one_sample() {
    let mut histogram = LatencyHistogram::new(0);
    histogram.update(1);
    histogram.update(2);
    assert_eq!(histogram.len(), 1);
    assert_eq!(histogram.last(), Some(2));
}

#[test]
fn test_facade_calls_without_recorder_are_noops() {
    record_flush_interval(12);
    record_flush(3, 3);
    record_adjustment("applied");
}
