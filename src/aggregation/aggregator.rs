// SPDX-License-Identifier: GPL-3.0-only

//! Aggregation driver
//!
//! [`Aggregator::configure`] turns a grid and channel list into a plan
//! without touching the backend. [`Aggregator::run`] executes a plan: each
//! pass is cleared to its identity, every point is splatted into its cell
//! with the pass binding active, and the target is read back. Passes run
//! strictly in plan order on the calling thread.

use super::buffer::AccumulationBuffers;
use super::channel::WeightChannel;
use super::geometry::{GridBounds, GridGeometry};
use super::planner::AggregationPlan;
use super::results::AggregationOutput;
use crate::backends::RasterBackend;
use crate::config::AggregatorConfig;
use crate::constants::MAX_POINTS_PER_DRAW;
use crate::errors::{AggregationResult, RunError};
use crate::points::PointSource;
use tracing::{debug, info, warn};

/// Owns a backend and the accumulation buffers of one grid
pub struct Aggregator<B: RasterBackend> {
    backend: B,
    config: AggregatorConfig,
    buffers: AccumulationBuffers,
}

impl<B: RasterBackend> Aggregator<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, AggregatorConfig::default())
    }

    pub fn with_config(backend: B, config: AggregatorConfig) -> Self {
        let capabilities = backend.capabilities();
        info!(
            backend = %capabilities.name,
            max_dimension = capabilities.max_texture_dimension_2d,
            multi_slot = capabilities.supports_multi_slot_equations,
            "Aggregator created"
        );
        Self {
            backend,
            buffers: AccumulationBuffers::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn buffers(&self) -> &AccumulationBuffers {
        &self.buffers
    }

    /// Validate channels, resolve equations and pack passes.
    ///
    /// Reads backend capabilities only; no buffer is allocated or touched.
    pub fn configure(
        &self,
        bounds: GridBounds,
        cell_size: [f32; 2],
        channels: &[WeightChannel],
    ) -> AggregationResult<AggregationPlan> {
        let geometry = GridGeometry::new(bounds, cell_size)?;
        AggregationPlan::build(
            geometry,
            channels,
            &self.backend.capabilities(),
            &self.config,
        )
    }

    /// Execute `plan` over `points`.
    ///
    /// Weight arrays are checked before any buffer is touched. A failure
    /// while allocating targets or during a pass invalidates every buffer
    /// and nothing is returned.
    pub fn run<P: PointSource + ?Sized>(
        &mut self,
        points: &P,
        plan: &AggregationPlan,
    ) -> AggregationResult<AggregationOutput> {
        let weights = collect_weights(points, plan)?;
        let sizes: Vec<usize> = plan.channels.iter().map(WeightChannel::components).collect();

        let outcome = self
            .buffers
            .ensure_targets(&mut self.backend, plan)
            .and_then(|()| self.execute(points.positions(), &weights, &sizes, plan));
        if let Err(e) = outcome {
            warn!(error = %e, "Aggregation run failed, buffers invalidated");
            self.buffers.invalidate();
            return Err(e);
        }

        info!(
            points = points.len(),
            passes = plan.pass_count(),
            cols = plan.geometry.cols,
            rows = plan.geometry.rows,
            "Aggregation run complete"
        );
        AggregationOutput::collect(plan, &self.buffers, points.len())
    }

    fn execute(
        &mut self,
        positions: &[[f32; 2]],
        weights: &[&[f32]],
        sizes: &[usize],
        plan: &AggregationPlan,
    ) -> AggregationResult<()> {
        for (index, pass) in plan.passes.iter().enumerate() {
            self.buffers.clear_for_pass(&mut self.backend, index, pass)?;

            let mut values = Vec::with_capacity(positions.len().min(MAX_POINTS_PER_DRAW));
            for (batch, chunk) in positions.chunks(MAX_POINTS_PER_DRAW).enumerate() {
                let first = batch * MAX_POINTS_PER_DRAW;
                values.clear();
                values.extend(
                    (first..first + chunk.len())
                        .map(|point| pass.splat_value(weights, sizes, point)),
                );
                self.buffers
                    .accumulate(&mut self.backend, index, pass, plan, chunk, &values)?;
            }

            self.buffers.read_back(&mut self.backend, index)?;
            debug!(
                pass = index,
                kind = ?pass.kind,
                binding = %pass.binding,
                points = positions.len(),
                "Pass complete"
            );
        }
        Ok(())
    }
}

impl<B: RasterBackend> Drop for Aggregator<B> {
    fn drop(&mut self) {
        self.buffers.release(&mut self.backend);
    }
}

/// Check every channel's weight array against the point count
fn collect_weights<'a, P: PointSource + ?Sized>(
    points: &'a P,
    plan: &AggregationPlan,
) -> AggregationResult<Vec<&'a [f32]>> {
    if let Some(actual) = points.channel_count()
        && actual != plan.channels.len()
    {
        return Err(RunError::PlanMismatch {
            expected: plan.channels.len(),
            actual,
        }
        .into());
    }

    let len = points.len();
    plan.channels
        .iter()
        .enumerate()
        .map(|(channel, descriptor)| {
            let weights = points
                .weights(channel)
                .ok_or(RunError::MissingWeights { channel })?;
            let expected = len * descriptor.components();
            if weights.len() != expected {
                return Err(RunError::WeightLengthMismatch {
                    channel,
                    expected,
                    actual: weights.len(),
                }
                .into());
            }
            Ok(weights)
        })
        .collect()
}
