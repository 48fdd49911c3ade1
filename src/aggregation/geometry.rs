// SPDX-License-Identifier: GPL-3.0-only

//! Grid geometry and point bucketing

use crate::errors::{AggregationResult, CapacityError, ConfigurationError};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Axis-aligned world-space extent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl GridBounds {
    pub fn new(min: [f32; 2], max: [f32; 2]) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f32 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f32 {
        self.max[1] - self.min[1]
    }

    /// Closed on both ends; NaN coordinates are never contained
    pub fn contains(&self, position: [f32; 2]) -> bool {
        position[0] >= self.min[0]
            && position[0] <= self.max[0]
            && position[1] >= self.min[1]
            && position[1] <= self.max[1]
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let finite = self.min.iter().chain(self.max.iter()).all(|v| v.is_finite());
        if !finite || self.width() <= 0.0 || self.height() <= 0.0 {
            return Err(ConfigurationError::InvalidBounds {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Resolved lattice: bounds, cell size and cell counts
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridGeometry {
    pub bounds: GridBounds,
    pub cell_size: [f32; 2],
    pub cols: u32,
    pub rows: u32,
}

impl GridGeometry {
    /// Resolve cell counts as `ceil(extent / cell_size)`.
    ///
    /// The ratio is taken in `f32` so the last column and row agree with
    /// `cell_of` and the vertex shader.
    pub fn new(bounds: GridBounds, cell_size: [f32; 2]) -> AggregationResult<Self> {
        bounds.validate()?;
        if cell_size.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ConfigurationError::InvalidCellSize(cell_size).into());
        }

        let cols = f64::from((bounds.width() / cell_size[0]).ceil());
        let rows = f64::from((bounds.height() / cell_size[1]).ceil());
        if cols > f64::from(u32::MAX) || rows > f64::from(u32::MAX) {
            return Err(CapacityError::GridTooLarge {
                width: cols.min(f64::from(u32::MAX)) as u32,
                height: rows.min(f64::from(u32::MAX)) as u32,
                max: u32::MAX,
            }
            .into());
        }

        Ok(Self {
            bounds,
            cell_size,
            cols: (cols as u32).max(1),
            rows: (rows as u32).max(1),
        })
    }

    pub fn cell_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Row-major index of a cell
    #[inline]
    pub fn cell_index(&self, col: u32, row: u32) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    /// Bucket a position.
    ///
    /// `floor((p - min) / cell_size)` clamped to the last cell, so points on
    /// the upper edge land in the last cell. Points outside the bounds map to
    /// no cell. Computed in `f32` like the vertex shader.
    pub fn cell_of(&self, position: [f32; 2]) -> Option<(u32, u32)> {
        if !self.bounds.contains(position) {
            return None;
        }
        let col = ((position[0] - self.bounds.min[0]) / self.cell_size[0]).floor();
        let row = ((position[1] - self.bounds.min[1]) / self.cell_size[1]).floor();
        let col = (col.max(0.0) as u32).min(self.cols - 1);
        let row = (row.max(0.0) as u32).min(self.rows - 1);
        Some((col, row))
    }

    /// World-space extent of one cell
    pub fn cell_bounds(&self, col: u32, row: u32) -> GridBounds {
        let min = [
            self.bounds.min[0] + col as f32 * self.cell_size[0],
            self.bounds.min[1] + row as f32 * self.cell_size[1],
        ];
        GridBounds {
            min,
            max: [min[0] + self.cell_size[0], min[1] + self.cell_size[1]],
        }
    }

    /// Uniform block consumed by the splat shader
    pub fn uniforms(&self) -> GridUniforms {
        GridUniforms {
            origin: self.bounds.min,
            cell_size: self.cell_size,
            bounds_max: self.bounds.max,
            counts: [self.cols as f32, self.rows as f32],
        }
    }
}

/// Grid parameters as laid out in the WGSL `Grid` struct
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GridUniforms {
    pub origin: [f32; 2],
    pub cell_size: [f32; 2],
    pub bounds_max: [f32; 2],
    pub counts: [f32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid() -> GridGeometry {
        GridGeometry::new(GridBounds::new([0.0, 0.0], [2.0, 2.0]), [1.0, 1.0]).unwrap()
    }

    #[test]
    fn test_cell_counts() {
        let grid = unit_grid();
        assert_eq!((grid.cols, grid.rows), (2, 2));
        assert_eq!(grid.cell_count(), 4);

        let uneven =
            GridGeometry::new(GridBounds::new([0.0, 0.0], [2.5, 1.0]), [1.0, 0.5]).unwrap();
        assert_eq!((uneven.cols, uneven.rows), (3, 2));
    }

    #[test]
    fn test_decimal_cell_size_has_no_phantom_column() {
        // 0.3 / 0.1 is slightly above 3 in f64 but exactly 3 in f32
        let grid =
            GridGeometry::new(GridBounds::new([0.0, 0.0], [0.3, 0.2]), [0.1, 0.1]).unwrap();
        assert_eq!((grid.cols, grid.rows), (3, 2));
        assert_eq!(grid.cell_of([0.25, 0.05]), Some((2, 0)));
        assert_eq!(grid.cell_of([0.3, 0.2]), Some((2, 1)));
        assert!(grid.cell_bounds(2, 0).max[0] <= 0.3 + f32::EPSILON);
    }

    #[test]
    fn test_bucketing() {
        let grid = unit_grid();
        assert_eq!(grid.cell_of([0.1, 0.1]), Some((0, 0)));
        assert_eq!(grid.cell_of([0.9, 0.9]), Some((0, 0)));
        assert_eq!(grid.cell_of([1.1, 0.1]), Some((1, 0)));
        assert_eq!(grid.cell_of([1.0, 1.0]), Some((1, 1)));
    }

    #[test]
    fn test_upper_edge_maps_to_last_cell() {
        let grid = unit_grid();
        assert_eq!(grid.cell_of([2.0, 2.0]), Some((1, 1)));
        assert_eq!(grid.cell_of([2.0, 0.0]), Some((1, 0)));
    }

    #[test]
    fn test_outside_points_discarded() {
        let grid = unit_grid();
        assert_eq!(grid.cell_of([-0.01, 0.5]), None);
        assert_eq!(grid.cell_of([0.5, 2.01]), None);
        assert_eq!(grid.cell_of([f32::NAN, 0.5]), None);
    }

    #[test]
    fn test_cell_bounds_round_trip_center() {
        let grid =
            GridGeometry::new(GridBounds::new([-10.0, 5.0], [10.0, 15.0]), [2.0, 2.5]).unwrap();
        let extent = grid.cell_bounds(3, 2);
        assert_eq!(extent.min, [-4.0, 10.0]);
        assert_eq!(extent.max, [-2.0, 12.5]);
        let center = [
            (extent.min[0] + extent.max[0]) / 2.0,
            (extent.min[1] + extent.max[1]) / 2.0,
        ];
        assert_eq!(grid.cell_of(center), Some((3, 2)));
    }

    #[test]
    fn test_invalid_definitions() {
        let bounds = GridBounds::new([0.0, 0.0], [1.0, 1.0]);
        assert!(GridGeometry::new(bounds, [0.0, 1.0]).is_err());
        assert!(GridGeometry::new(bounds, [1.0, f32::NAN]).is_err());
        assert!(GridGeometry::new(GridBounds::new([1.0, 0.0], [1.0, 1.0]), [1.0, 1.0]).is_err());
        assert!(
            GridGeometry::new(GridBounds::new([0.0, 0.0], [1.0e30, 1.0]), [1.0e-10, 1.0])
                .unwrap_err()
                .is_configuration_time()
        );
    }
}
