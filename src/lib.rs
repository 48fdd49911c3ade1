// SPDX-License-Identifier: GPL-3.0-only

//! GPU grid aggregation
//!
//! Bins 2D points into a regular grid and reduces per-point weights per
//! cell (SUM, MEAN, MIN, MAX), optionally tracking per-cell minimum and
//! maximum. Accumulation happens in float render targets through hardware
//! blending: every point is drawn as a single-texel splat.
//!
//! # Architecture
//!
//! - [`aggregation`]: channels, equation resolution, pass planning,
//!   accumulation buffers and the [`Aggregator`] driver
//! - [`backends`]: the [`RasterBackend`] abstraction with a wgpu and a
//!   host-memory implementation
//! - [`points`]: point sources and file loaders
//! - [`config`]: aggregator configuration and request documents
//! - [`gpu`]: wgpu device creation
//! - [`shaders`]: the splat shader and GPU readback helpers
//!
//! # Example
//!
//! ```
//! use gpu_grid_aggregator::{Aggregator, GridBounds, PointCloud, ReferenceBackend, WeightChannel};
//!
//! let mut aggregator = Aggregator::new(ReferenceBackend::new());
//! let plan = aggregator
//!     .configure(GridBounds::new([0.0, 0.0], [2.0, 2.0]), [1.0, 1.0], &[WeightChannel::sum()])
//!     .unwrap();
//! let points = PointCloud::new(vec![[0.5, 0.5], [0.7, 0.2]]).with_channel(vec![1.0, 5.0]);
//! let output = aggregator.run(&points, &plan).unwrap();
//! assert_eq!(output.channels[0].values.get(0, 0, 0), Some(6.0));
//! ```

pub mod aggregation;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod points;
pub mod shaders;

// Re-export commonly used types
pub use aggregation::{
    AggregationOutput, AggregationPlan, Aggregator, ChannelResult, GridBounds, GridGeometry,
    Operation, WeightChannel,
};
pub use backends::{BackendKind, RasterBackend, ReferenceBackend, WgpuBackend, create_backend};
pub use config::{AggregationRequest, AggregatorConfig};
pub use errors::{AggregationError, AggregationResult};
pub use points::{PointCloud, PointSource};
