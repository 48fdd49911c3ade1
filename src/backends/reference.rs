// SPDX-License-Identifier: GPL-3.0-only

//! Host-memory rasterization backend
//!
//! Emulates the blend hardware the GPU backend drives: float32 targets,
//! per-group blend equations, 1×1 point splats bucketed with the grid rule.
//! Draws land in submission order, which makes results bit-for-bit
//! reproducible. Used by tests and as the `auto` fallback without a GPU.

use super::{BackendCapabilities, RasterBackend, TargetHandle};
use crate::aggregation::equation::EquationBinding;
use crate::aggregation::geometry::GridGeometry;
use crate::errors::{AggregationResult, BackendError};
use std::collections::BTreeMap;
use tracing::debug;

struct Target {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

/// Deterministic CPU emulation of the point rasterizer
pub struct ReferenceBackend {
    capabilities: BackendCapabilities,
    targets: BTreeMap<TargetHandle, Target>,
    next_handle: u32,
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities {
            name: "reference".to_string(),
            ..Default::default()
        })
    }

    /// Backend reporting custom limits, e.g. without multi-slot blending
    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            capabilities,
            targets: BTreeMap::new(),
            next_handle: 0,
        }
    }

    /// Number of targets currently allocated
    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    fn target_mut(&mut self, handle: TargetHandle) -> AggregationResult<&mut Target> {
        self.targets
            .get_mut(&handle)
            .ok_or_else(|| BackendError::UnknownTarget(handle.0).into())
    }
}

impl RasterBackend for ReferenceBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities.clone()
    }

    fn create_target(&mut self, width: u32, height: u32) -> AggregationResult<TargetHandle> {
        let handle = TargetHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.targets.insert(handle, Target {
            width,
            height,
            texels: vec![[0.0; 4]; width as usize * height as usize],
        });
        Ok(handle)
    }

    fn destroy_target(&mut self, target: TargetHandle) {
        self.targets.remove(&target);
    }

    fn clear_target(&mut self, target: TargetHandle, value: [f32; 4]) -> AggregationResult<()> {
        self.target_mut(target)?.texels.fill(value);
        Ok(())
    }

    fn draw_points(
        &mut self,
        target: TargetHandle,
        binding: &EquationBinding,
        geometry: &GridGeometry,
        positions: &[[f32; 2]],
        values: &[[f32; 4]],
    ) -> AggregationResult<()> {
        if !binding.is_uniform() && !self.capabilities.supports_multi_slot_equations {
            return Err(BackendError::UnsupportedBinding(binding.to_string()).into());
        }
        if positions.len() != values.len() {
            return Err(BackendError::DrawFailed(format!(
                "{} positions but {} attribute values",
                positions.len(),
                values.len()
            ))
            .into());
        }

        let surface = self.target_mut(target)?;
        if (surface.width, surface.height) != (geometry.cols, geometry.rows) {
            return Err(BackendError::DrawFailed(format!(
                "target is {}x{}, grid is {}x{}",
                surface.width, surface.height, geometry.cols, geometry.rows
            ))
            .into());
        }

        let equations: [_; 4] = std::array::from_fn(|slot| binding.equation_for_slot(slot));
        let mut drawn = 0usize;
        for (position, value) in positions.iter().zip(values) {
            let Some((col, row)) = geometry.cell_of(*position) else {
                continue;
            };
            let texel = &mut surface.texels[geometry.cell_index(col, row)];
            for ((dst, src), equation) in texel.iter_mut().zip(value).zip(&equations) {
                *dst = equation.apply(*dst, *src);
            }
            drawn += 1;
        }

        debug!(
            target = target.0,
            binding = %binding,
            submitted = positions.len(),
            drawn,
            "Reference draw"
        );
        Ok(())
    }

    fn read_pixels(&mut self, target: TargetHandle) -> AggregationResult<Vec<[f32; 4]>> {
        Ok(self.target_mut(target)?.texels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::geometry::GridBounds;
    use crate::constants::{ADD_BLEND_EQUATION, MAX_MIN_BLEND_EQUATION};

    fn geometry() -> GridGeometry {
        GridGeometry::new(GridBounds::new([0.0, 0.0], [2.0, 1.0]), [1.0, 1.0]).unwrap()
    }

    #[test]
    fn test_additive_draw() {
        let mut backend = ReferenceBackend::new();
        let target = backend.create_target(2, 1).unwrap();
        backend.clear_target(target, ADD_BLEND_EQUATION.clear_value()).unwrap();
        backend
            .draw_points(
                target,
                &ADD_BLEND_EQUATION,
                &geometry(),
                &[[0.5, 0.5], [0.5, 0.5], [1.5, 0.5], [3.0, 0.5]],
                &[[1.0, 0.0, 0.0, 1.0], [2.0, 0.0, 0.0, 1.0], [5.0, 0.0, 0.0, 1.0], [
                    100.0, 0.0, 0.0, 1.0,
                ]],
            )
            .unwrap();
        let pixels = backend.read_pixels(target).unwrap();
        assert_eq!(pixels[0], [3.0, 0.0, 0.0, 2.0]);
        assert_eq!(pixels[1], [5.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_split_equations() {
        let mut backend = ReferenceBackend::new();
        let target = backend.create_target(2, 1).unwrap();
        backend
            .clear_target(target, MAX_MIN_BLEND_EQUATION.clear_value())
            .unwrap();
        backend
            .draw_points(
                target,
                &MAX_MIN_BLEND_EQUATION,
                &geometry(),
                &[[0.5, 0.5], [0.5, 0.5]],
                &[[4.0, 0.0, 0.0, 4.0], [-2.0, 0.0, 0.0, -2.0]],
            )
            .unwrap();
        let pixels = backend.read_pixels(target).unwrap();
        assert_eq!(pixels[0][0], 4.0);
        assert_eq!(pixels[0][3], -2.0);
    }

    #[test]
    fn test_multi_slot_rejected_when_unsupported() {
        let mut backend = ReferenceBackend::with_capabilities(BackendCapabilities {
            supports_multi_slot_equations: false,
            ..Default::default()
        });
        let target = backend.create_target(2, 1).unwrap();
        let err = backend.draw_points(target, &MAX_MIN_BLEND_EQUATION, &geometry(), &[], &[]);
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_target() {
        let mut backend = ReferenceBackend::new();
        let target = backend.create_target(1, 1).unwrap();
        backend.destroy_target(target);
        assert!(backend.read_pixels(target).is_err());
        assert_eq!(backend.live_targets(), 0);
    }
}
