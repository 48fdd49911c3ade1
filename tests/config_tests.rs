// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use gpu_grid_aggregator::errors::{AggregationError, ConfigurationError};
use gpu_grid_aggregator::{AggregationRequest, AggregatorConfig, Operation, WeightChannel};

#[test]
fn test_config_default() {
    let config = AggregatorConfig::default();
    assert_eq!(config.max_passes, 16);
    assert_eq!(config.empty_value, 0.0, "MEAN sentinel should default to zero");
    assert!(config.saturate, "Saturation should be enabled by default");
}

#[test]
fn test_channel_defaults() {
    // An empty channel object is a scalar SUM without extra statistics
    let channel: WeightChannel = serde_json::from_str("{}").unwrap();
    assert_eq!(channel, WeightChannel::sum());
    assert_eq!(channel.size, 1);
    assert!(!channel.need_min && !channel.need_max && !channel.combine_max_min);
}

#[test]
fn test_operation_names() {
    for operation in Operation::ALL {
        let parsed: Operation = operation.name().to_lowercase().parse().unwrap();
        assert_eq!(parsed, operation);
    }
    let err = "MEDIAN".parse::<Operation>().unwrap_err();
    assert_eq!(err, ConfigurationError::UnknownOperation("MEDIAN".to_string()));
}

#[test]
fn test_unknown_operation_in_document() {
    let err = AggregationRequest::from_json(
        r#"{"bounds": {"min": [0, 0], "max": [1, 1]}, "cellSize": [1, 1],
            "channels": [{"operation": "MODE"}]}"#,
    )
    .unwrap_err();
    assert!(matches!(err, AggregationError::Parse(_)));
}

#[test]
fn test_request_with_config() {
    let request = AggregationRequest::from_json(
        r#"{
            "bounds": {"min": [-1, -1], "max": [1, 1]},
            "cellSize": [0.5, 0.5],
            "channels": [{"size": 2, "operation": "MAX", "needMin": true}],
            "config": {"emptyValue": -1, "saturate": false}
        }"#,
    )
    .unwrap();
    assert_eq!(request.config.empty_value, -1.0);
    assert!(!request.config.saturate);
    assert_eq!(request.config.max_passes, 16);

    let channel = &request.channels[0];
    assert_eq!(channel.operation, Operation::Max);
    assert!(channel.need_min);

    let geometry = request.geometry().unwrap();
    assert_eq!((geometry.cols, geometry.rows), (4, 4));
}

#[test]
fn test_invalid_cell_size() {
    let request = AggregationRequest::from_json(
        r#"{"bounds": {"min": [0, 0], "max": [1, 1]}, "cellSize": [0, 1], "channels": [{}]}"#,
    )
    .unwrap();
    let err = request.geometry().unwrap_err();
    assert!(err.is_configuration_time());
}
