use super::*;
use crate::error::classify;

#[test]
fn test_default_config_is_valid() {
    let config = PreAggregateConfig::default();
    assert_eq!(config.strategy, PreAggregateStrategy::Global);
    assert_eq!(config.max_count, 1);
    assert_eq!(config.max_time(), None);
    assert_eq!(config.control_topic, DEFAULT_CONTROL_TOPIC);
    assert_eq!(config.histogram_window, DEFAULT_HISTOGRAM_WINDOW);
    config.validate().unwrap();
}

#[test]
fn test_zero_count_is_configuration_error() {
    let err = PreAggregateConfig::new(0).validate().unwrap_err();
    assert!(matches!(
        classify(&err),
        Some(PreAggregateError::Configuration(_))
    ));
}

#[test]
fn test_count_beyond_signed_range_is_configuration_error() {
    PreAggregateConfig::new(MAX_COUNT_LIMIT).validate().unwrap();
    let err = PreAggregateConfig::new(MAX_COUNT_LIMIT + 1)
        .validate()
        .unwrap_err();
    assert!(matches!(
        classify(&err),
        Some(PreAggregateError::Configuration(_))
    ));
}

#[test]
fn test_zero_time_threshold_rejected() {
    let config = PreAggregateConfig::new(10).with_max_time(Duration::ZERO);
    assert!(config.validate().is_err());
}

#[test]
fn test_builder_methods() {
    let config = PreAggregateConfig::new(100)
        .with_strategy(PreAggregateStrategy::Local)
        .with_max_time(Duration::from_millis(250))
        .with_control_topic("pre-agg")
        .with_broker_address("10.0.0.1:1883")
        .with_histogram_window(16);

    assert_eq!(config.max_count, 100);
    assert_eq!(config.strategy, PreAggregateStrategy::Local);
    assert_eq!(config.max_time(), Some(Duration::from_millis(250)));
    assert_eq!(config.control_topic, "pre-agg");
    assert_eq!(config.broker_address, "10.0.0.1:1883");
    assert_eq!(config.histogram_window, 16);
}

#[test]
fn test_strategy_from_str_is_case_insensitive() {
    assert_eq!(
        "global".parse::<PreAggregateStrategy>().unwrap(),
        PreAggregateStrategy::Global
    );
    assert_eq!(
        "Local".parse::<PreAggregateStrategy>().unwrap(),
        PreAggregateStrategy::Local
    );
    assert_eq!(
        "per-key".parse::<PreAggregateStrategy>().unwrap(),
        PreAggregateStrategy::PerKey
    );
    assert_eq!(
        "PER_KEY".parse::<PreAggregateStrategy>().unwrap(),
        PreAggregateStrategy::PerKey
    );
    assert!("broadcast".parse::<PreAggregateStrategy>().is_err());
}

#[test]
fn test_strategy_display_round_trips() {
    for strategy in [
        PreAggregateStrategy::Global,
        PreAggregateStrategy::Local,
        PreAggregateStrategy::PerKey,
    ] {
        assert_eq!(
            strategy.to_string().parse::<PreAggregateStrategy>().unwrap(),
            strategy
        );
    }
}

#[test]
fn test_from_json_fills_defaults() {
    let config =
        PreAggregateConfig::from_json(r#"{ "strategy": "LOCAL", "max_count": 50 }"#).unwrap();
    assert_eq!(config.strategy, PreAggregateStrategy::Local);
    assert_eq!(config.max_count, 50);
    assert_eq!(config.control_topic, DEFAULT_CONTROL_TOPIC);
    assert_eq!(config.broker_address, DEFAULT_BROKER_ADDRESS);
}

#[test]
fn test_from_json_rejects_invalid_threshold() {
    let err = PreAggregateConfig::from_json(r#"{ "max_count": 0 }"#).unwrap_err();
    assert!(matches!(
        classify(&err),
        Some(PreAggregateError::Configuration(_))
    ));
}

#[test]
fn test_from_json_rejects_malformed_input() {
    let err = PreAggregateConfig::from_json("{ max_count: ").unwrap_err();
    assert!(matches!(
        classify(&err),
        Some(PreAggregateError::Configuration(_))
    ));
}
