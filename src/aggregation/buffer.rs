// SPDX-License-Identifier: GPL-3.0-only

//! Grid accumulation buffers
//!
//! Owns one render target per planned pass, all sized to the grid. Targets
//! are allocated lazily, cleared to the identity of their pass binding before
//! any point is drawn, and read back into host snapshots afterwards.
//! Two-equation max/min passes render into companion targets.

use super::channel::Operation;
use super::equation::Statistic;
use super::planner::{AggregationPlan, PassPlan, TargetRole};
use crate::backends::{RasterBackend, TargetHandle};
use crate::config::AggregatorConfig;
use crate::constants::MAX_32_BIT_FLOAT;
use crate::errors::{AggregationResult, BackendError, CapacityError};
use tracing::debug;

/// Lifecycle of one accumulation target within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Allocated, contents undefined
    Allocated,
    /// Every slot holds its equation's identity
    Cleared,
    /// Points were drawn since the last clear
    Accumulated,
    /// Snapshot taken, safe to read
    Read,
    /// A failed run left the contents undefined
    Invalid,
}

/// One render target and its host snapshot
#[derive(Debug)]
pub struct GridAccumulationBuffer {
    handle: TargetHandle,
    role: TargetRole,
    state: BufferState,
    cells: Vec<[f32; 4]>,
}

impl GridAccumulationBuffer {
    pub fn handle(&self) -> TargetHandle {
        self.handle
    }

    pub fn role(&self) -> TargetRole {
        self.role
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Last snapshot, row-major
    pub fn cells(&self) -> &[[f32; 4]] {
        &self.cells
    }
}

/// Buffer manager for one aggregator
#[derive(Debug)]
pub struct AccumulationBuffers {
    width: u32,
    height: u32,
    empty_value: f32,
    saturate: bool,
    buffers: Vec<GridAccumulationBuffer>,
    passes: Vec<PassPlan>,
    operations: Vec<Operation>,
}

impl AccumulationBuffers {
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            width: 0,
            height: 0,
            empty_value: config.empty_value,
            saturate: config.saturate,
            buffers: Vec::new(),
            passes: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn buffers(&self) -> &[GridAccumulationBuffer] {
        &self.buffers
    }

    /// Change the grid dimensions.
    ///
    /// Existing targets are destroyed and reallocated lazily at the new size.
    pub fn resize<B: RasterBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> AggregationResult<()> {
        if width == 0 || height == 0 {
            return Err(CapacityError::InvalidDimensions { width, height }.into());
        }
        let max = backend.capabilities().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(CapacityError::GridTooLarge { width, height, max }.into());
        }
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }

        debug!(width, height, "Resizing grid accumulation buffers");
        self.release(backend);
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Make sure there is one target per pass of `plan`
    pub fn ensure_targets<B: RasterBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        plan: &AggregationPlan,
    ) -> AggregationResult<()> {
        self.resize(backend, plan.geometry.cols, plan.geometry.rows)?;

        while self.buffers.len() > plan.passes.len() {
            if let Some(buffer) = self.buffers.pop() {
                backend.destroy_target(buffer.handle);
            }
        }
        for (index, pass) in plan.passes.iter().enumerate() {
            if let Some(buffer) = self.buffers.get_mut(index) {
                buffer.role = pass.role;
                continue;
            }
            let handle = backend.create_target(self.width, self.height)?;
            debug!(
                pass = index,
                role = ?pass.role,
                width = self.width,
                height = self.height,
                "Allocated accumulation target"
            );
            self.buffers.push(GridAccumulationBuffer {
                handle,
                role: pass.role,
                state: BufferState::Allocated,
                cells: Vec::new(),
            });
        }

        self.passes = plan.passes.clone();
        self.operations = plan.channels.iter().map(|c| c.operation).collect();
        Ok(())
    }

    fn buffer_mut(&mut self, pass: usize) -> AggregationResult<&mut GridAccumulationBuffer> {
        self.buffers
            .get_mut(pass)
            .ok_or_else(|| BackendError::UnknownTarget(pass as u32).into())
    }

    /// Clear a pass target to the identity of its binding.
    ///
    /// Must run before any point of that pass is drawn.
    pub fn clear_for_pass<B: RasterBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pass: usize,
        plan_entry: &PassPlan,
    ) -> AggregationResult<()> {
        let buffer = self.buffer_mut(pass)?;
        backend.clear_target(buffer.handle, plan_entry.binding.clear_value())?;
        buffer.state = BufferState::Cleared;
        buffer.cells.clear();
        Ok(())
    }

    /// Draw one batch of splats into a cleared pass target
    pub fn accumulate<B: RasterBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pass: usize,
        plan_entry: &PassPlan,
        plan: &AggregationPlan,
        positions: &[[f32; 2]],
        values: &[[f32; 4]],
    ) -> AggregationResult<()> {
        let buffer = self.buffer_mut(pass)?;
        if !matches!(buffer.state, BufferState::Cleared | BufferState::Accumulated) {
            return Err(BackendError::DrawFailed(format!(
                "pass {} target is {:?}, expected a cleared target",
                pass, buffer.state
            ))
            .into());
        }
        backend.draw_points(
            buffer.handle,
            &plan_entry.binding,
            &plan.geometry,
            positions,
            values,
        )?;
        buffer.state = BufferState::Accumulated;
        Ok(())
    }

    /// Read a pass target back into its host snapshot
    pub fn read_back<B: RasterBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pass: usize,
    ) -> AggregationResult<()> {
        let expected = self.width as usize * self.height as usize;
        let saturate = self.saturate;
        let buffer = self.buffer_mut(pass)?;
        let mut cells = backend.read_pixels(buffer.handle)?;
        if cells.len() != expected {
            return Err(BackendError::ReadbackFailed(format!(
                "expected {} cells, backend returned {}",
                expected,
                cells.len()
            ))
            .into());
        }
        if saturate {
            cells.iter_mut().flatten().for_each(|v| *v = saturate_value(*v));
        }
        buffer.cells = cells;
        buffer.state = BufferState::Read;
        Ok(())
    }

    /// Mark every target undefined after a failed run
    pub fn invalidate(&mut self) {
        for buffer in &mut self.buffers {
            buffer.state = BufferState::Invalid;
            buffer.cells.clear();
        }
    }

    /// Destroy all targets
    pub fn release<B: RasterBackend + ?Sized>(&mut self, backend: &mut B) {
        for buffer in self.buffers.drain(..) {
            backend.destroy_target(buffer.handle);
        }
    }

    /// True once every pass target holds a snapshot
    pub fn is_readable(&self) -> bool {
        !self.buffers.is_empty() && self.buffers.iter().all(|b| b.state == BufferState::Read)
    }

    fn snapshot(&self, pass: usize) -> Option<&[[f32; 4]]> {
        self.buffers
            .get(pass)
            .filter(|b| b.state == BufferState::Read)
            .map(|b| b.cells.as_slice())
    }

    /// Raw point count of a cell, if the pass holding `channel` counts points
    pub fn cell_count(&self, cell: usize, channel: usize) -> Option<u32> {
        let pass = self
            .passes
            .iter()
            .position(|p| p.holds(channel, Statistic::Value))?;
        let slot = self.passes[pass].count_slot()?;
        let texel = self.snapshot(pass)?.get(cell)?;
        Some(texel[slot].max(0.0).round() as u32)
    }

    /// Final value of one component of a channel statistic in a cell.
    ///
    /// MEAN values are divided by the cell's point count here; cells without
    /// points yield the configured sentinel instead of a division by zero.
    pub fn cell_value(
        &self,
        cell: usize,
        channel: usize,
        statistic: Statistic,
        component: usize,
    ) -> Option<f32> {
        let pass = self
            .passes
            .iter()
            .position(|p| p.holds(channel, statistic))?;
        let slot = self.passes[pass].slot_of(channel, statistic, component)?;
        let texel = self.snapshot(pass)?.get(cell)?;
        let value = texel[slot];

        let operation = *self.operations.get(channel)?;
        if statistic == Statistic::Value && operation == Operation::Mean {
            let count = texel[self.passes[pass].count_slot()?];
            if count <= 0.0 {
                return Some(self.empty_value);
            }
            return Some(value / count);
        }
        Some(value)
    }

    /// First component of a channel's primary statistic at `(x, y)`
    pub fn read_cell(&self, x: u32, y: u32, channel: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let cell = y as usize * self.width as usize + x as usize;
        self.cell_value(cell, channel, Statistic::Value, 0)
    }
}

/// Clamp overflowed accumulations to the largest finite float
#[inline]
pub fn saturate_value(value: f32) -> f32 {
    if value.is_nan() {
        value
    } else {
        value.clamp(-MAX_32_BIT_FLOAT, MAX_32_BIT_FLOAT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::channel::WeightChannel;
    use crate::aggregation::geometry::{GridBounds, GridGeometry};
    use crate::backends::{BackendCapabilities, ReferenceBackend};

    fn plan(channels: &[WeightChannel]) -> AggregationPlan {
        let geometry =
            GridGeometry::new(GridBounds::new([0.0, 0.0], [2.0, 2.0]), [1.0, 1.0]).unwrap();
        AggregationPlan::build(
            geometry,
            channels,
            &BackendCapabilities::default(),
            &AggregatorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_resize_validation() {
        let mut backend = ReferenceBackend::with_capabilities(BackendCapabilities {
            max_texture_dimension_2d: 16,
            ..Default::default()
        });
        let mut buffers = AccumulationBuffers::new(&AggregatorConfig::default());
        assert!(buffers.resize(&mut backend, 0, 4).is_err());
        assert!(buffers.resize(&mut backend, 17, 4).is_err());
        assert!(buffers.resize(&mut backend, 16, 16).is_ok());
        assert_eq!(buffers.dimensions(), (16, 16));
    }

    #[test]
    fn test_resize_releases_targets() {
        let mut backend = ReferenceBackend::new();
        let mut buffers = AccumulationBuffers::new(&AggregatorConfig::default());
        let plan = plan(&[WeightChannel::sum()]);
        buffers.ensure_targets(&mut backend, &plan).unwrap();
        assert_eq!(backend.live_targets(), 1);

        buffers.resize(&mut backend, 8, 8).unwrap();
        assert_eq!(backend.live_targets(), 0);
        assert!(buffers.buffers().is_empty());
    }

    #[test]
    fn test_draw_requires_clear() {
        let mut backend = ReferenceBackend::new();
        let mut buffers = AccumulationBuffers::new(&AggregatorConfig::default());
        let plan = plan(&[WeightChannel::sum()]);
        buffers.ensure_targets(&mut backend, &plan).unwrap();

        let pass = &plan.passes[0];
        let err = buffers.accumulate(&mut backend, 0, pass, &plan, &[[0.5, 0.5]], &[[1.0; 4]]);
        assert!(err.is_err());

        buffers.clear_for_pass(&mut backend, 0, pass).unwrap();
        buffers
            .accumulate(&mut backend, 0, pass, &plan, &[[0.5, 0.5]], &[[1.0; 4]])
            .unwrap();
        buffers.read_back(&mut backend, 0).unwrap();
        assert_eq!(buffers.read_cell(0, 0, 0), Some(1.0));
        assert_eq!(buffers.read_cell(1, 1, 0), Some(0.0));
        assert_eq!(buffers.read_cell(2, 0, 0), None);
    }

    #[test]
    fn test_mean_sentinel_for_empty_cells() {
        let config = AggregatorConfig {
            empty_value: -1.0,
            ..Default::default()
        };
        let mut backend = ReferenceBackend::new();
        let mut buffers = AccumulationBuffers::new(&config);
        let plan = plan(&[WeightChannel::mean()]);
        buffers.ensure_targets(&mut backend, &plan).unwrap();

        let pass = &plan.passes[0];
        let weights: [&[f32]; 1] = [&[2.0, 4.0]];
        let values = [
            pass.splat_value(&weights, &[1], 0),
            pass.splat_value(&weights, &[1], 1),
        ];
        buffers.clear_for_pass(&mut backend, 0, pass).unwrap();
        buffers
            .accumulate(&mut backend, 0, pass, &plan, &[[0.2, 0.2], [0.7, 0.3]], &values)
            .unwrap();
        buffers.read_back(&mut backend, 0).unwrap();

        assert_eq!(buffers.read_cell(0, 0, 0), Some(3.0));
        assert_eq!(buffers.cell_count(0, 0), Some(2));
        assert_eq!(buffers.read_cell(1, 0, 0), Some(-1.0));
        assert_eq!(buffers.cell_count(1, 0), Some(0));
    }

    #[test]
    fn test_invalidate_hides_snapshots() {
        let mut backend = ReferenceBackend::new();
        let mut buffers = AccumulationBuffers::new(&AggregatorConfig::default());
        let plan = plan(&[WeightChannel::sum()]);
        buffers.ensure_targets(&mut backend, &plan).unwrap();
        buffers.clear_for_pass(&mut backend, 0, &plan.passes[0]).unwrap();
        buffers.read_back(&mut backend, 0).unwrap();
        assert!(buffers.is_readable());

        buffers.invalidate();
        assert!(!buffers.is_readable());
        assert_eq!(buffers.read_cell(0, 0, 0), None);
    }

    #[test]
    fn test_saturate_value() {
        assert_eq!(saturate_value(f32::INFINITY), MAX_32_BIT_FLOAT);
        assert_eq!(saturate_value(f32::NEG_INFINITY), -MAX_32_BIT_FLOAT);
        assert_eq!(saturate_value(12.5), 12.5);
        assert!(saturate_value(f32::NAN).is_nan());
    }
}
