// SPDX-License-Identifier: GPL-3.0-only

//! Grid aggregation core
//!
//! Points are rasterized as single-cell splats into float render targets
//! with hardware blending doing the accumulation:
//!
//! - [`channel`]: weight channel descriptors and operations
//! - [`equation`]: mapping operations to blend equation bindings
//! - [`geometry`]: grid bounds, cell counts and the bucketing rule
//! - [`planner`]: packing channel requests into render passes
//! - [`buffer`]: accumulation targets and their lifecycle
//! - [`aggregator`]: plan execution
//! - [`results`]: per-channel cell grids

pub mod aggregator;
pub mod buffer;
pub mod channel;
pub mod equation;
pub mod geometry;
pub mod planner;
pub mod results;

pub use aggregator::Aggregator;
pub use buffer::{AccumulationBuffers, BufferState};
pub use channel::{Operation, WeightChannel};
pub use equation::{BlendEquation, EquationBinding, Statistic};
pub use geometry::{GridBounds, GridGeometry};
pub use planner::{AggregationPlan, PassPlan, SlotContent, TargetRole};
pub use results::{AggregationOutput, CellGrid, ChannelResult};
