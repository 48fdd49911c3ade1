// SPDX-License-Identifier: GPL-3.0-only

//! Aggregation configuration
//!
//! [`AggregatorConfig`] is an immutable value handed to each aggregator, so
//! concurrent aggregators never share mutable defaults. [`AggregationRequest`]
//! is the JSON document the command-line tool reads.

use crate::aggregation::channel::WeightChannel;
use crate::aggregation::geometry::{GridBounds, GridGeometry};
use crate::constants::{DEFAULT_MAX_PASSES, EMPTY_CELL_SENTINEL};
use crate::errors::AggregationResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for planning and readback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregatorConfig {
    /// Plans needing more passes fail with a capacity error
    pub max_passes: usize,
    /// Value read back for MEAN cells without points
    pub empty_value: f32,
    /// Clamp overflowed accumulations to the largest finite float
    pub saturate: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            empty_value: EMPTY_CELL_SENTINEL,
            saturate: true,
        }
    }
}

/// Grid definition plus channel list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    pub bounds: GridBounds,
    pub cell_size: [f32; 2],
    pub channels: Vec<WeightChannel>,
    #[serde(default)]
    pub config: AggregatorConfig,
}

impl AggregationRequest {
    pub fn from_json(json: &str) -> AggregationResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> AggregationResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Resolve the grid this request describes
    pub fn geometry(&self) -> AggregationResult<GridGeometry> {
        GridGeometry::new(self.bounds, self.cell_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::channel::Operation;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AggregatorConfig = serde_json::from_str(r#"{"maxPasses": 4}"#).unwrap();
        assert_eq!(config.max_passes, 4);
        assert_eq!(config.empty_value, EMPTY_CELL_SENTINEL);
        assert!(config.saturate);
    }

    #[test]
    fn test_request_document() {
        let request = AggregationRequest::from_json(
            r#"{
                "bounds": {"min": [0, 0], "max": [2, 2]},
                "cellSize": [1, 1],
                "channels": [
                    {"operation": "MEAN", "needMin": true, "needMax": true, "combineMaxMin": true},
                    {"size": 3}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(request.channels.len(), 2);
        assert_eq!(request.channels[0].operation, Operation::Mean);
        assert!(request.channels[0].wants_combined_max_min());
        assert_eq!(request.channels[1].size, 3);
        assert_eq!(request.channels[1].operation, Operation::Sum);
        assert_eq!(request.config, AggregatorConfig::default());

        let geometry = request.geometry().unwrap();
        assert_eq!((geometry.cols, geometry.rows), (2, 2));
    }

    #[test]
    fn test_malformed_request_is_parse_error() {
        let err = AggregationRequest::from_json("{").unwrap_err();
        assert!(matches!(err, crate::errors::AggregationError::Parse(_)));
    }
}
