// SPDX-License-Identifier: GPL-3.0-only

//! Error types for grid aggregation
//!
//! Configuration and capacity errors are raised before any GPU resource is
//! touched. Backend errors abort a whole `run`; buffer contents are invalid
//! afterwards until the next full run.

use std::fmt;

/// Result type alias using AggregationError
pub type AggregationResult<T> = Result<T, AggregationError>;

/// Top-level error type
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// Invalid channel list or grid definition
    Configuration(ConfigurationError),
    /// Grid or plan exceeds what the backend can hold
    Capacity(CapacityError),
    /// Inputs handed to `run` do not match the plan
    Run(RunError),
    /// Rasterization backend failure
    Backend(BackendError),
    /// Filesystem errors while loading documents
    Io(String),
    /// Malformed input documents
    Parse(String),
}

/// Errors raised while validating a channel list or grid definition
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// No weight channels were requested
    NoChannels,
    /// Channel size outside 1..=4
    InvalidChannelSize { channel: usize, size: u8 },
    /// Operation name not in {SUM, MEAN, MIN, MAX}
    UnknownOperation(String),
    /// Requested statistics need more simultaneous slots than a target has
    UnsupportedCombination { channel: usize, reason: String },
    /// Cell size must be finite and positive on both axes
    InvalidCellSize([f32; 2]),
    /// Bounds must be finite with max > min on both axes
    InvalidBounds { min: [f32; 2], max: [f32; 2] },
}

/// Errors raised when the backend cannot hold the grid or the plan
#[derive(Debug, Clone, PartialEq)]
pub enum CapacityError {
    /// Grid dimensions exceed the backend's 2D target limit
    GridTooLarge { width: u32, height: u32, max: u32 },
    /// Zero-sized grid
    InvalidDimensions { width: u32, height: u32 },
    /// Plan needs more passes than allowed
    TooManyPasses { required: usize, max: usize },
}

/// Errors raised by `run` before any pass executes
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    /// Point source carries a different number of channels than the plan
    PlanMismatch { expected: usize, actual: usize },
    /// A channel's weight array has the wrong length
    WeightLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },
    /// A channel has no weight array at all
    MissingWeights { channel: usize },
}

/// Rasterization backend failures
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// No usable adapter or device
    InitializationFailed(String),
    /// The adapter lacks a required feature
    MissingFeature(String),
    /// Handle does not name a live target
    UnknownTarget(u32),
    /// Binding needs per-group equations the backend cannot provide
    UnsupportedBinding(String),
    /// Draw submission was rejected
    DrawFailed(String),
    /// Pixels could not be read back
    ReadbackFailed(String),
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AggregationError::Capacity(e) => write!(f, "Capacity error: {}", e),
            AggregationError::Run(e) => write!(f, "Run error: {}", e),
            AggregationError::Backend(e) => write!(f, "Backend error: {}", e),
            AggregationError::Io(msg) => write!(f, "I/O error: {}", msg),
            AggregationError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::NoChannels => write!(f, "No weight channels requested"),
            ConfigurationError::InvalidChannelSize { channel, size } => write!(
                f,
                "Channel {} has size {}, expected 1 to 4 components",
                channel, size
            ),
            ConfigurationError::UnknownOperation(name) => {
                write!(f, "Unknown aggregation operation: {}", name)
            }
            ConfigurationError::UnsupportedCombination { channel, reason } => {
                write!(f, "Channel {}: unsupported combination: {}", channel, reason)
            }
            ConfigurationError::InvalidCellSize(size) => {
                write!(f, "Invalid cell size {:?}", size)
            }
            ConfigurationError::InvalidBounds { min, max } => {
                write!(f, "Invalid grid bounds {:?} to {:?}", min, max)
            }
        }
    }
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityError::GridTooLarge { width, height, max } => write!(
                f,
                "Grid of {}x{} cells exceeds the maximum target size {}",
                width, height, max
            ),
            CapacityError::InvalidDimensions { width, height } => {
                write!(f, "Invalid grid dimensions {}x{}", width, height)
            }
            CapacityError::TooManyPasses { required, max } => write!(
                f,
                "Plan requires {} passes, at most {} allowed",
                required, max
            ),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::PlanMismatch { expected, actual } => write!(
                f,
                "Plan covers {} channels but the point source provides {}",
                expected, actual
            ),
            RunError::WeightLengthMismatch {
                channel,
                expected,
                actual,
            } => write!(
                f,
                "Channel {} has {} weight values, expected {}",
                channel, actual, expected
            ),
            RunError::MissingWeights { channel } => {
                write!(f, "No weights provided for channel {}", channel)
            }
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::MissingFeature(msg) => write!(f, "Missing feature: {}", msg),
            BackendError::UnknownTarget(id) => write!(f, "Unknown render target {}", id),
            BackendError::UnsupportedBinding(msg) => write!(f, "Unsupported binding: {}", msg),
            BackendError::DrawFailed(msg) => write!(f, "Draw failed: {}", msg),
            BackendError::ReadbackFailed(msg) => write!(f, "Readback failed: {}", msg),
        }
    }
}

impl std::error::Error for AggregationError {}
impl std::error::Error for ConfigurationError {}
impl std::error::Error for CapacityError {}
impl std::error::Error for RunError {}
impl std::error::Error for BackendError {}

impl From<ConfigurationError> for AggregationError {
    fn from(err: ConfigurationError) -> Self {
        AggregationError::Configuration(err)
    }
}

impl From<CapacityError> for AggregationError {
    fn from(err: CapacityError) -> Self {
        AggregationError::Capacity(err)
    }
}

impl From<RunError> for AggregationError {
    fn from(err: RunError) -> Self {
        AggregationError::Run(err)
    }
}

impl From<BackendError> for AggregationError {
    fn from(err: BackendError) -> Self {
        AggregationError::Backend(err)
    }
}

impl From<std::io::Error> for AggregationError {
    fn from(err: std::io::Error) -> Self {
        AggregationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AggregationError {
    fn from(err: serde_json::Error) -> Self {
        AggregationError::Parse(err.to_string())
    }
}

impl From<las::Error> for AggregationError {
    fn from(err: las::Error) -> Self {
        AggregationError::Parse(err.to_string())
    }
}

impl AggregationError {
    /// True for errors raised before any buffer was touched
    pub fn is_configuration_time(&self) -> bool {
        matches!(
            self,
            AggregationError::Configuration(_) | AggregationError::Capacity(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_wraps_category() {
        let err: AggregationError = ConfigurationError::InvalidChannelSize {
            channel: 2,
            size: 7,
        }
        .into();
        let msg = err.to_string();
        assert!(msg.starts_with("Configuration error"));
        assert!(msg.contains("size 7"));
    }

    #[test]
    fn test_configuration_time_classification() {
        let capacity: AggregationError = CapacityError::TooManyPasses {
            required: 20,
            max: 16,
        }
        .into();
        assert!(capacity.is_configuration_time());

        let backend: AggregationError = BackendError::DrawFailed("lost".into()).into();
        assert!(!backend.is_configuration_time());
    }
}
