// SPDX-License-Identifier: GPL-3.0-only

//! Rasterization backend abstraction
//!
//! The aggregation core only needs a handful of operations from whatever
//! rasterizes points: allocate float targets, clear them, draw 1×1 point
//! splats with a blend binding active, and read the pixels back.
//!
//! - [`wgpu_backend`]: GPU render pipelines through wgpu
//! - [`reference`]: host-memory emulation of the same blend hardware

pub mod reference;
pub mod wgpu_backend;

use crate::aggregation::equation::EquationBinding;
use crate::aggregation::geometry::GridGeometry;
use crate::constants::DEFAULT_MAX_TEXTURE_DIMENSION;
use crate::errors::AggregationResult;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use reference::ReferenceBackend;
pub use wgpu_backend::WgpuBackend;

/// Opaque render target handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetHandle(pub u32);

/// What a backend can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Backend name for diagnostics
    pub name: String,
    /// Largest width or height of a 2D render target
    pub max_texture_dimension_2d: u32,
    /// Color and alpha slots can blend with different equations in one pass
    pub supports_multi_slot_equations: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            max_texture_dimension_2d: DEFAULT_MAX_TEXTURE_DIMENSION,
            supports_multi_slot_equations: true,
        }
    }
}

/// Backend selection for the CLI and for `auto` fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// GPU when available, otherwise the reference backend
    #[default]
    Auto,
    Gpu,
    Reference,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::Gpu => "gpu",
            BackendKind::Reference => "reference",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point rasterizer consumed by the aggregator.
///
/// All calls are issued from a single thread in plan order. `read_pixels`
/// is the synchronization point: it returns only once every earlier draw on
/// that target has completed.
pub trait RasterBackend {
    fn capabilities(&self) -> BackendCapabilities;

    /// Allocate a `width × height` RGBA32F target
    fn create_target(&mut self, width: u32, height: u32) -> AggregationResult<TargetHandle>;

    /// Release a target; unknown handles are ignored
    fn destroy_target(&mut self, target: TargetHandle);

    /// Set every texel to `value`
    fn clear_target(&mut self, target: TargetHandle, value: [f32; 4]) -> AggregationResult<()>;

    /// Rasterize `positions` as single-cell splats carrying `values`.
    ///
    /// Positions are bucketed with the grid's rule; points outside the
    /// bounds are dropped. `values[i]` is written to the four slots of the
    /// cell hit by `positions[i]` through `binding`.
    fn draw_points(
        &mut self,
        target: TargetHandle,
        binding: &EquationBinding,
        geometry: &GridGeometry,
        positions: &[[f32; 2]],
        values: &[[f32; 4]],
    ) -> AggregationResult<()>;

    /// Row-major texels, row 0 first
    fn read_pixels(&mut self, target: TargetHandle) -> AggregationResult<Vec<[f32; 4]>>;
}

impl<B: RasterBackend + ?Sized> RasterBackend for Box<B> {
    fn capabilities(&self) -> BackendCapabilities {
        (**self).capabilities()
    }

    fn create_target(&mut self, width: u32, height: u32) -> AggregationResult<TargetHandle> {
        (**self).create_target(width, height)
    }

    fn destroy_target(&mut self, target: TargetHandle) {
        (**self).destroy_target(target)
    }

    fn clear_target(&mut self, target: TargetHandle, value: [f32; 4]) -> AggregationResult<()> {
        (**self).clear_target(target, value)
    }

    fn draw_points(
        &mut self,
        target: TargetHandle,
        binding: &EquationBinding,
        geometry: &GridGeometry,
        positions: &[[f32; 2]],
        values: &[[f32; 4]],
    ) -> AggregationResult<()> {
        (**self).draw_points(target, binding, geometry, positions, values)
    }

    fn read_pixels(&mut self, target: TargetHandle) -> AggregationResult<Vec<[f32; 4]>> {
        (**self).read_pixels(target)
    }
}

/// Create a backend of the requested kind.
///
/// `Auto` tries the GPU first and logs why it fell back.
pub fn create_backend(kind: BackendKind) -> AggregationResult<Box<dyn RasterBackend>> {
    match kind {
        BackendKind::Reference => Ok(Box::new(ReferenceBackend::new())),
        BackendKind::Gpu => Ok(Box::new(WgpuBackend::new_blocking()?)),
        BackendKind::Auto => match WgpuBackend::new_blocking() {
            Ok(backend) => Ok(Box::new(backend)),
            Err(e) => {
                tracing::warn!(error = %e, "GPU backend unavailable, using reference backend");
                Ok(Box::new(ReferenceBackend::new()))
            }
        },
    }
}
