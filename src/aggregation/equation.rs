// SPDX-License-Identifier: GPL-3.0-only

//! Equation resolution
//!
//! Maps requested statistics onto the fixed set of hardware blend equations.
//! A render target blends its color slots (RGB) and its alpha slot with two
//! independently selectable equations, so one pass can run at most two
//! different equations, and the second one only on a single slot.

use super::channel::{Operation, WeightChannel};
use crate::constants::{
    ADD_BLEND_EQUATION, ALPHA_SLOT, ELEMENT_COUNT, MAX_32_BIT_FLOAT, MAX_BLEND_EQUATION,
    MAX_MIN_BLEND_EQUATION, MIN_BLEND_EQUATION, WEIGHT_SIZE,
};
use crate::errors::ConfigurationError;
use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// Hardware combining rule applied when a fragment lands on a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlendEquation {
    Add,
    Min,
    Max,
}

impl BlendEquation {
    /// Value a slot must be cleared to so the first contribution is unaffected
    pub fn identity(&self) -> f32 {
        match self {
            BlendEquation::Add => 0.0,
            BlendEquation::Min => MAX_32_BIT_FLOAT,
            BlendEquation::Max => -MAX_32_BIT_FLOAT,
        }
    }

    /// Combine an incoming value with the stored one
    #[inline]
    pub fn apply(&self, dst: f32, src: f32) -> f32 {
        match self {
            BlendEquation::Add => dst + src,
            BlendEquation::Min => dst.min(src),
            BlendEquation::Max => dst.max(src),
        }
    }

    pub fn to_wgpu(&self) -> wgpu::BlendOperation {
        match self {
            BlendEquation::Add => wgpu::BlendOperation::Add,
            BlendEquation::Min => wgpu::BlendOperation::Min,
            BlendEquation::Max => wgpu::BlendOperation::Max,
        }
    }
}

impl fmt::Display for BlendEquation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlendEquation::Add => f.write_str("ADD"),
            BlendEquation::Min => f.write_str("MIN"),
            BlendEquation::Max => f.write_str("MAX"),
        }
    }
}

/// Equations bound to the color slots and the alpha slot of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EquationBinding {
    pub color: BlendEquation,
    pub alpha: BlendEquation,
}

impl EquationBinding {
    pub const fn new(color: BlendEquation, alpha: BlendEquation) -> Self {
        Self { color, alpha }
    }

    pub const fn uniform(equation: BlendEquation) -> Self {
        Self::new(equation, equation)
    }

    /// Same equation on every slot
    pub fn is_uniform(&self) -> bool {
        self.color == self.alpha
    }

    pub fn equation_for_slot(&self, slot: usize) -> BlendEquation {
        if slot == ALPHA_SLOT {
            self.alpha
        } else {
            self.color
        }
    }

    /// Slots that blend with `equation` under this binding
    pub fn slots_for(&self, equation: BlendEquation) -> Range<usize> {
        match (self.color == equation, self.alpha == equation) {
            (true, true) => 0..ELEMENT_COUNT,
            (true, false) => 0..WEIGHT_SIZE,
            (false, true) => ALPHA_SLOT..ELEMENT_COUNT,
            (false, false) => 0..0,
        }
    }

    /// Clear color that is the identity element for every slot
    pub fn clear_value(&self) -> [f32; 4] {
        std::array::from_fn(|slot| self.equation_for_slot(slot).identity())
    }

    pub fn to_wgpu(&self) -> wgpu::BlendState {
        let component = |equation: BlendEquation| wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: equation.to_wgpu(),
        };
        wgpu::BlendState {
            color: component(self.color),
            alpha: component(self.alpha),
        }
    }
}

impl fmt::Display for EquationBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_uniform() {
            write!(f, "{}", self.color)
        } else {
            write!(f, "[{}, {}]", self.color, self.alpha)
        }
    }
}

/// Which result grid a slot feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    /// The channel's primary operation
    Value,
    /// Auxiliary minimum of raw weights
    Min,
    /// Auxiliary maximum of raw weights
    Max,
}

/// Primary passes run before auxiliary min/max passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Primary,
    Auxiliary,
}

/// A vector of slots that must be written together with one equation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneRequest {
    pub channel: usize,
    pub statistic: Statistic,
    pub components: usize,
    pub equation: BlendEquation,
}

/// Everything one statistic of one channel needs from a single pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRequest {
    pub kind: PassKind,
    pub binding: EquationBinding,
    pub lanes: Vec<LaneRequest>,
    /// Reserve an additive slot counting points per cell
    pub needs_count: bool,
}

impl PassRequest {
    fn single(
        kind: PassKind,
        binding: EquationBinding,
        lane: LaneRequest,
        needs_count: bool,
    ) -> Self {
        Self {
            kind,
            binding,
            lanes: vec![lane],
            needs_count,
        }
    }

    /// Slots this request occupies in a fresh target
    pub fn slot_demand(&self) -> usize {
        self.lanes.iter().map(|l| l.components).sum::<usize>() + usize::from(self.needs_count)
    }
}

/// Pass requests for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub primary: PassRequest,
    pub auxiliary: Vec<PassRequest>,
}

/// Binding for a channel's primary operation
pub fn primary_binding(operation: Operation) -> EquationBinding {
    match operation {
        Operation::Sum | Operation::Mean => ADD_BLEND_EQUATION,
        Operation::Min => MIN_BLEND_EQUATION,
        Operation::Max => MAX_BLEND_EQUATION,
    }
}

/// Resolve the blend equations a channel needs.
///
/// `multi_slot` reports whether the backend can run different equations on
/// the color and alpha slots of one target. Without it a combined min/max
/// request falls back to two separate passes.
pub fn resolve_channel(
    index: usize,
    channel: &WeightChannel,
    multi_slot: bool,
) -> Result<ResolvedChannel, ConfigurationError> {
    let components = channel.components();
    let lane = |statistic, equation| LaneRequest {
        channel: index,
        statistic,
        components,
        equation,
    };

    let binding = primary_binding(channel.operation);
    let needs_count = channel.operation.needs_count();
    let primary = PassRequest::single(
        PassKind::Primary,
        binding,
        lane(Statistic::Value, binding.color),
        needs_count,
    );

    if primary.slot_demand() > ELEMENT_COUNT {
        return Err(ConfigurationError::UnsupportedCombination {
            channel: index,
            reason: format!(
                "{} of {} components needs {} slots including the point count, a target has {}",
                channel.operation,
                components,
                primary.slot_demand(),
                ELEMENT_COUNT
            ),
        });
    }

    let mut auxiliary = Vec::with_capacity(2);
    if channel.wants_combined_max_min() && multi_slot {
        let alpha_slots = ELEMENT_COUNT - WEIGHT_SIZE;
        if components > alpha_slots {
            return Err(ConfigurationError::UnsupportedCombination {
                channel: index,
                reason: format!(
                    "combined max/min has {} alpha slot for {} components",
                    alpha_slots, components
                ),
            });
        }
        auxiliary.push(PassRequest {
            kind: PassKind::Auxiliary,
            binding: MAX_MIN_BLEND_EQUATION,
            lanes: vec![
                lane(Statistic::Max, MAX_MIN_BLEND_EQUATION.color),
                lane(Statistic::Min, MAX_MIN_BLEND_EQUATION.alpha),
            ],
            needs_count: false,
        });
    } else {
        if channel.need_min {
            auxiliary.push(PassRequest::single(
                PassKind::Auxiliary,
                MIN_BLEND_EQUATION,
                lane(Statistic::Min, BlendEquation::Min),
                false,
            ));
        }
        if channel.need_max {
            auxiliary.push(PassRequest::single(
                PassKind::Auxiliary,
                MAX_BLEND_EQUATION,
                lane(Statistic::Max, BlendEquation::Max),
                false,
            ));
        }
    }

    Ok(ResolvedChannel { primary, auxiliary })
}
