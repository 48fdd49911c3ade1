// SPDX-License-Identifier: GPL-3.0-only

//! Aggregation-wide constants

use crate::aggregation::equation::{BlendEquation, EquationBinding};

/// Largest finite single-precision value.
///
/// Accumulation happens in `f32`; this is the hard precision ceiling. Sums
/// beyond it saturate on readback instead of wrapping or turning infinite.
pub const MAX_32_BIT_FLOAT: f32 = 3.402_823_466e38;

/// Number of channel slots in one grid cell (RGBA)
pub const ELEMENT_COUNT: usize = 4;

/// Number of slots in the color blend group (RGB)
///
/// The remaining slot is the alpha group, which the hardware blends with its
/// own equation.
pub const WEIGHT_SIZE: usize = 3;

/// Index of the alpha slot
pub const ALPHA_SLOT: usize = 3;

/// Floats per texel of an accumulation target (RGBA32F)
pub const PIXEL_SIZE: usize = 4;

/// Bytes per texel of an accumulation target
pub const BYTES_PER_PIXEL: u32 = (PIXEL_SIZE * std::mem::size_of::<f32>()) as u32;

/// wgpu requires texture-to-buffer copies to align rows to this many bytes
pub const COPY_ROW_ALIGNMENT: u32 = 256;

/// Value read back for MEAN cells without contributing points
pub const EMPTY_CELL_SENTINEL: f32 = 0.0;

/// Upper bound on render passes per plan unless configured otherwise
pub const DEFAULT_MAX_PASSES: usize = 16;

/// Points uploaded per draw call; larger inputs are split into batches
pub const MAX_POINTS_PER_DRAW: usize = 1 << 20;

/// Largest 2D render target when the backend does not report a limit
pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// Additive accumulation on every slot (SUM, MEAN and point counts)
pub const ADD_BLEND_EQUATION: EquationBinding = EquationBinding::uniform(BlendEquation::Add);

/// Running minimum on every slot
pub const MIN_BLEND_EQUATION: EquationBinding = EquationBinding::uniform(BlendEquation::Min);

/// Running maximum on every slot
pub const MAX_BLEND_EQUATION: EquationBinding = EquationBinding::uniform(BlendEquation::Max);

/// Maximum on the color slots, minimum on alpha
pub const MAX_MIN_BLEND_EQUATION: EquationBinding =
    EquationBinding::new(BlendEquation::Max, BlendEquation::Min);

/// Accumulation target format
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Debug labels for GPU resources
pub mod labels {
    pub const DEVICE: &str = "grid_aggregation_gpu";
    pub const ACCUMULATION_TARGET: &str = "grid_accumulation_target";
    pub const SPLAT_SHADER: &str = "grid_splat_shader";
    pub const SPLAT_BIND_GROUP_LAYOUT: &str = "grid_splat_bind_group_layout";
    pub const SPLAT_BIND_GROUP: &str = "grid_splat_bind_group";
    pub const SPLAT_PIPELINE_LAYOUT: &str = "grid_splat_pipeline_layout";
    pub const GRID_UNIFORMS: &str = "grid_uniforms";
    pub const POSITION_BUFFER: &str = "grid_point_positions";
    pub const VALUE_BUFFER: &str = "grid_point_values";
    pub const STAGING_BUFFER: &str = "grid_readback_staging";
}
