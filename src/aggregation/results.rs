// SPDX-License-Identifier: GPL-3.0-only

//! Per-channel aggregation results

use super::buffer::AccumulationBuffers;
use super::channel::Operation;
use super::equation::Statistic;
use super::geometry::GridGeometry;
use super::planner::AggregationPlan;
use crate::constants::MAX_32_BIT_FLOAT;
use crate::errors::{AggregationResult, BackendError};
use serde::Serialize;

/// Row-major grid of `size`-component cells
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellGrid {
    pub cols: u32,
    pub rows: u32,
    pub size: usize,
    pub data: Vec<f32>,
}

impl CellGrid {
    /// Component of the cell at `(col, row)`, `None` outside the grid
    pub fn get(&self, col: u32, row: u32, component: usize) -> Option<f32> {
        if col >= self.cols || row >= self.rows || component >= self.size {
            return None;
        }
        let cell = row as usize * self.cols as usize + col as usize;
        self.data.get(cell * self.size + component).copied()
    }

    /// All components of the cell at `(col, row)`
    pub fn cell(&self, col: u32, row: u32) -> Option<&[f32]> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        let start = (row as usize * self.cols as usize + col as usize) * self.size;
        self.data.get(start..start + self.size)
    }

    fn collect(
        geometry: &GridGeometry,
        size: usize,
        mut read: impl FnMut(usize, usize) -> Option<f32>,
    ) -> AggregationResult<Self> {
        let cells = geometry.cell_count();
        let mut data = Vec::with_capacity(cells * size);
        for cell in 0..cells {
            for component in 0..size {
                let value = read(cell, component).ok_or_else(|| {
                    BackendError::ReadbackFailed(format!(
                        "cell {} component {} has no snapshot",
                        cell, component
                    ))
                })?;
                data.push(value);
            }
        }
        Ok(Self {
            cols: geometry.cols,
            rows: geometry.rows,
            size,
            data,
        })
    }
}

/// Final values of one weight channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelResult {
    pub operation: Operation,
    pub size: usize,
    pub values: CellGrid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<CellGrid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<CellGrid>,
    /// Points per cell, known for MEAN channels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<u32>>,
}

impl ChannelResult {
    /// Smallest and largest first-component value over non-empty cells.
    ///
    /// Occupancy comes from the counts when known, then from a min or max
    /// grid still at its clearing identity. A plain SUM channel has no
    /// occupancy signal and ranges over every cell. Non-finite values are
    /// skipped.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        let stride = self.values.size;
        self.values
            .data
            .chunks_exact(stride)
            .enumerate()
            .filter(|(cell, _)| self.is_occupied(*cell))
            .map(|(_, values)| values[0])
            .filter(|v| v.is_finite())
            .fold(None, |range, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Whether any point reached `cell`, as far as the results can tell
    pub fn is_occupied(&self, cell: usize) -> bool {
        if let Some(counts) = &self.counts {
            return counts.get(cell).is_some_and(|c| *c > 0);
        }
        let first = |grid: &CellGrid| grid.data.get(cell * grid.size).copied();
        if let Some(max) = &self.max {
            return first(max).is_some_and(|v| v != -MAX_32_BIT_FLOAT);
        }
        if let Some(min) = &self.min {
            return first(min).is_some_and(|v| v != MAX_32_BIT_FLOAT);
        }
        match self.operation {
            Operation::Min => first(&self.values).is_some_and(|v| v != MAX_32_BIT_FLOAT),
            Operation::Max => first(&self.values).is_some_and(|v| v != -MAX_32_BIT_FLOAT),
            Operation::Sum | Operation::Mean => true,
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationOutput {
    pub geometry: GridGeometry,
    pub channels: Vec<ChannelResult>,
    pub points_submitted: usize,
}

impl AggregationOutput {
    /// Assemble results from fully read buffers
    pub(crate) fn collect(
        plan: &AggregationPlan,
        buffers: &AccumulationBuffers,
        points_submitted: usize,
    ) -> AggregationResult<Self> {
        let geometry = &plan.geometry;
        let mut channels = Vec::with_capacity(plan.channels.len());
        for (index, channel) in plan.channels.iter().enumerate() {
            let size = channel.components();
            let statistic_grid = |statistic: Statistic| {
                CellGrid::collect(geometry, size, |cell, component| {
                    buffers.cell_value(cell, index, statistic, component)
                })
            };

            let values = statistic_grid(Statistic::Value)?;
            let min = match plan.pass_for(index, Statistic::Min) {
                Some(_) => Some(statistic_grid(Statistic::Min)?),
                None => None,
            };
            let max = match plan.pass_for(index, Statistic::Max) {
                Some(_) => Some(statistic_grid(Statistic::Max)?),
                None => None,
            };
            let counts = if channel.operation.needs_count() {
                (0..geometry.cell_count())
                    .map(|cell| buffers.cell_count(cell, index))
                    .collect::<Option<Vec<u32>>>()
            } else {
                None
            };

            channels.push(ChannelResult {
                operation: channel.operation,
                size,
                values,
                min,
                max,
                counts,
            });
        }

        Ok(Self {
            geometry: *geometry,
            channels,
            points_submitted,
        })
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelResult> {
        self.channels.get(index)
    }
}
