// SPDX-License-Identifier: GPL-3.0-only

//! Weight channel descriptors
//!
//! A channel is one statistic request over a per-point weight of 1 to 4
//! components. Independently of its primary operation a channel may ask for
//! the per-cell minimum and/or maximum of its raw weights.

use crate::constants::ELEMENT_COUNT;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primary reduction applied per grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Sum of weights
    #[default]
    Sum,
    /// Sum of weights divided by the number of points
    Mean,
    /// Smallest weight
    Min,
    /// Largest weight
    Max,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Sum,
        Operation::Mean,
        Operation::Min,
        Operation::Max,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Sum => "SUM",
            Operation::Mean => "MEAN",
            Operation::Min => "MIN",
            Operation::Max => "MAX",
        }
    }

    /// MEAN divides by a parallel point count at read time
    pub fn needs_count(&self) -> bool {
        matches!(self, Operation::Mean)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Operation::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ConfigurationError::UnknownOperation(trimmed.to_string()))
    }
}

/// One statistic request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WeightChannel {
    /// Number of weight components aggregated together (1 to 4)
    pub size: u8,
    /// Primary reduction
    pub operation: Operation,
    /// Also track the per-cell minimum of the raw weights
    pub need_min: bool,
    /// Also track the per-cell maximum of the raw weights
    pub need_max: bool,
    /// Pack min and max into one two-equation pass when both are requested
    pub combine_max_min: bool,
}

impl Default for WeightChannel {
    fn default() -> Self {
        Self {
            size: 1,
            operation: Operation::Sum,
            need_min: false,
            need_max: false,
            combine_max_min: false,
        }
    }
}

impl WeightChannel {
    pub fn new(size: u8, operation: Operation) -> Self {
        Self {
            size,
            operation,
            ..Self::default()
        }
    }

    pub fn sum() -> Self {
        Self::new(1, Operation::Sum)
    }

    pub fn mean() -> Self {
        Self::new(1, Operation::Mean)
    }

    pub fn min() -> Self {
        Self::new(1, Operation::Min)
    }

    pub fn max() -> Self {
        Self::new(1, Operation::Max)
    }

    pub fn with_size(mut self, size: u8) -> Self {
        self.size = size;
        self
    }

    pub fn with_min(mut self) -> Self {
        self.need_min = true;
        self
    }

    pub fn with_max(mut self) -> Self {
        self.need_max = true;
        self
    }

    pub fn with_max_min(mut self, combine: bool) -> Self {
        self.need_min = true;
        self.need_max = true;
        self.combine_max_min = combine;
        self
    }

    /// Component count as an index type
    pub fn components(&self) -> usize {
        self.size as usize
    }

    /// Both auxiliary statistics requested and allowed to share a pass
    pub fn wants_combined_max_min(&self) -> bool {
        self.need_min && self.need_max && self.combine_max_min
    }

    /// Check the size bound; `index` is only used for error reporting
    pub fn validate(&self, index: usize) -> Result<(), ConfigurationError> {
        if self.size == 0 || self.components() > ELEMENT_COUNT {
            return Err(ConfigurationError::InvalidChannelSize {
                channel: index,
                size: self.size,
            });
        }
        Ok(())
    }
}

/// Validate a whole channel list
pub fn validate_channels(channels: &[WeightChannel]) -> Result<(), ConfigurationError> {
    if channels.is_empty() {
        return Err(ConfigurationError::NoChannels);
    }
    channels
        .iter()
        .enumerate()
        .try_for_each(|(index, channel)| channel.validate(index))
}
