// SPDX-License-Identifier: GPL-3.0-only

//! Aggregation pass planning
//!
//! Packs every channel's pass requests into as few render passes as
//! possible. Requests only share a pass when they need the same equation
//! binding and their slots fit into one target. MEAN requests in the same
//! pass share a single point-count slot since every point reaches every
//! channel. Primary passes come first, auxiliary min/max passes last.

use super::channel::{WeightChannel, validate_channels};
use super::equation::{
    BlendEquation, EquationBinding, PassKind, PassRequest, Statistic, resolve_channel,
};
use super::geometry::GridGeometry;
use crate::backends::BackendCapabilities;
use crate::config::AggregatorConfig;
use crate::constants::{ELEMENT_COUNT, MAX_MIN_BLEND_EQUATION};
use crate::errors::{AggregationResult, CapacityError, ConfigurationError};
use serde::Serialize;
use std::cmp::Reverse;
use std::ops::Range;
use tracing::{debug, info, warn};

/// What one slot of a pass accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SlotContent {
    /// One component of a channel's weight
    Weight {
        channel: usize,
        statistic: Statistic,
        component: usize,
    },
    /// Number of points per cell
    Count,
}

/// Which accumulation buffer family a pass renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    /// Single-equation passes
    Primary,
    /// Two-equation max/min passes
    Companion,
}

/// One render pass: a binding and the layout of its four slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassPlan {
    pub kind: PassKind,
    pub binding: EquationBinding,
    pub role: TargetRole,
    pub slots: [Option<SlotContent>; ELEMENT_COUNT],
}

impl PassPlan {
    fn new(kind: PassKind, binding: EquationBinding) -> Self {
        let role = if binding == MAX_MIN_BLEND_EQUATION {
            TargetRole::Companion
        } else {
            TargetRole::Primary
        };
        Self {
            kind,
            binding,
            role,
            slots: [None; ELEMENT_COUNT],
        }
    }

    /// Place a request if it fits; leaves the pass untouched otherwise
    fn try_place(&mut self, request: &PassRequest) -> bool {
        if request.binding != self.binding || request.kind != self.kind {
            return false;
        }

        let mut slots = self.slots;
        for lane in &request.lanes {
            let range = self.binding.slots_for(lane.equation);
            let Some(start) = find_free_run(&slots, range, lane.components) else {
                return false;
            };
            for component in 0..lane.components {
                slots[start + component] = Some(SlotContent::Weight {
                    channel: lane.channel,
                    statistic: lane.statistic,
                    component,
                });
            }
        }

        if request.needs_count && !slots.contains(&Some(SlotContent::Count)) {
            // Counts go high so value vectors stay contiguous from slot 0
            let range = self.binding.slots_for(BlendEquation::Add);
            let Some(slot) = range.rev().find(|&s| slots[s].is_none()) else {
                return false;
            };
            slots[slot] = Some(SlotContent::Count);
        }

        self.slots = slots;
        true
    }

    pub fn count_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| *s == Some(SlotContent::Count))
    }

    /// Slot holding `component` of a channel statistic
    pub fn slot_of(&self, channel: usize, statistic: Statistic, component: usize) -> Option<usize> {
        let wanted = Some(SlotContent::Weight {
            channel,
            statistic,
            component,
        });
        self.slots.iter().position(|s| *s == wanted)
    }

    pub fn holds(&self, channel: usize, statistic: Statistic) -> bool {
        self.slot_of(channel, statistic, 0).is_some()
    }

    pub fn used_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Channels with at least one slot in this pass, ascending
    pub fn channels(&self) -> Vec<usize> {
        let mut channels: Vec<usize> = self
            .slots
            .iter()
            .filter_map(|s| match s {
                Some(SlotContent::Weight { channel, .. }) => Some(*channel),
                _ => None,
            })
            .collect();
        channels.sort_unstable();
        channels.dedup();
        channels
    }

    /// Per-slot value one point contributes in this pass.
    ///
    /// `weights[c]` is channel `c`'s flat weight array with stride `sizes[c]`.
    /// Unused slots carry the identity of their equation.
    pub fn splat_value(&self, weights: &[&[f32]], sizes: &[usize], point: usize) -> [f32; 4] {
        std::array::from_fn(|slot| match self.slots[slot] {
            Some(SlotContent::Weight {
                channel, component, ..
            }) => weights[channel][point * sizes[channel] + component],
            Some(SlotContent::Count) => 1.0,
            None => self.binding.equation_for_slot(slot).identity(),
        })
    }
}

fn find_free_run(
    slots: &[Option<SlotContent>; ELEMENT_COUNT],
    range: Range<usize>,
    len: usize,
) -> Option<usize> {
    if len == 0 || range.len() < len {
        return None;
    }
    (range.start..=range.end - len)
        .find(|&start| slots[start..start + len].iter().all(Option::is_none))
}

/// Ordered list of passes for a channel list on a resolved grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationPlan {
    pub geometry: GridGeometry,
    pub channels: Vec<WeightChannel>,
    pub passes: Vec<PassPlan>,
}

impl AggregationPlan {
    /// Validate, resolve and pack.
    ///
    /// Pure: no backend resources are touched, only its capabilities read.
    pub fn build(
        geometry: GridGeometry,
        channels: &[WeightChannel],
        capabilities: &BackendCapabilities,
        config: &AggregatorConfig,
    ) -> AggregationResult<Self> {
        validate_channels(channels)?;

        let max = capabilities.max_texture_dimension_2d;
        if geometry.cols > max || geometry.rows > max {
            return Err(CapacityError::GridTooLarge {
                width: geometry.cols,
                height: geometry.rows,
                max,
            }
            .into());
        }

        let multi_slot = capabilities.supports_multi_slot_equations;
        let mut primary = Vec::with_capacity(channels.len());
        let mut auxiliary = Vec::new();
        for (index, channel) in channels.iter().enumerate() {
            if channel.wants_combined_max_min() && !multi_slot {
                warn!(
                    channel = index,
                    backend = %capabilities.name,
                    "Backend lacks multi-slot blending, using separate min and max passes"
                );
            }
            let resolved = resolve_channel(index, channel, multi_slot)?;
            primary.push(resolved.primary);
            auxiliary.extend(resolved.auxiliary);
        }

        let mut passes = Vec::new();
        pack(PassKind::Primary, primary, &mut passes)?;
        pack(PassKind::Auxiliary, auxiliary, &mut passes)?;

        if passes.len() > config.max_passes {
            return Err(CapacityError::TooManyPasses {
                required: passes.len(),
                max: config.max_passes,
            }
            .into());
        }

        info!(
            channels = channels.len(),
            passes = passes.len(),
            cols = geometry.cols,
            rows = geometry.rows,
            "Aggregation plan built"
        );
        for (index, pass) in passes.iter().enumerate() {
            debug!(
                pass = index,
                kind = ?pass.kind,
                binding = %pass.binding,
                slots = pass.used_slots(),
                "Planned pass"
            );
        }

        Ok(Self {
            geometry,
            channels: channels.to_vec(),
            passes,
        })
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn primary_passes(&self) -> impl Iterator<Item = &PassPlan> {
        self.passes.iter().filter(|p| p.kind == PassKind::Primary)
    }

    pub fn auxiliary_passes(&self) -> impl Iterator<Item = &PassPlan> {
        self.passes.iter().filter(|p| p.kind == PassKind::Auxiliary)
    }

    /// Index of the pass holding a channel statistic
    pub fn pass_for(&self, channel: usize, statistic: Statistic) -> Option<usize> {
        self.passes.iter().position(|p| p.holds(channel, statistic))
    }
}

/// First-fit decreasing over passes of one kind
fn pack(
    kind: PassKind,
    mut requests: Vec<PassRequest>,
    passes: &mut Vec<PassPlan>,
) -> Result<(), ConfigurationError> {
    requests.sort_by_key(|r| Reverse(r.slot_demand()));

    let first = passes.len();
    for request in &requests {
        if passes[first..].iter_mut().any(|p| p.try_place(request)) {
            continue;
        }
        let mut pass = PassPlan::new(kind, request.binding);
        if !pass.try_place(request) {
            return Err(ConfigurationError::UnsupportedCombination {
                channel: request.lanes.first().map(|l| l.channel).unwrap_or_default(),
                reason: format!("request does not fit an empty {} target", request.binding),
            });
        }
        passes.push(pass);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::channel::Operation;
    use crate::aggregation::geometry::GridBounds;
    use crate::constants::{ADD_BLEND_EQUATION, MAX_BLEND_EQUATION, MIN_BLEND_EQUATION};
    use crate::errors::AggregationError;

    fn geometry() -> GridGeometry {
        GridGeometry::new(GridBounds::new([0.0, 0.0], [4.0, 4.0]), [1.0, 1.0]).unwrap()
    }

    fn plan_with(
        channels: &[WeightChannel],
        multi_slot: bool,
    ) -> AggregationResult<AggregationPlan> {
        let capabilities = BackendCapabilities {
            supports_multi_slot_equations: multi_slot,
            ..Default::default()
        };
        AggregationPlan::build(geometry(), channels, &capabilities, &AggregatorConfig::default())
    }

    fn plan(channels: &[WeightChannel]) -> AggregationPlan {
        plan_with(channels, true).unwrap()
    }

    #[test]
    fn test_single_sum() {
        let plan = plan(&[WeightChannel::sum()]);
        assert_eq!(plan.pass_count(), 1);
        assert_eq!(plan.passes[0].binding, ADD_BLEND_EQUATION);
        assert_eq!(plan.passes[0].count_slot(), None);
        assert_eq!(plan.passes[0].slot_of(0, Statistic::Value, 0), Some(0));
    }

    #[test]
    fn test_compatible_channels_share_pass() {
        let split = plan(&[
            WeightChannel::sum(),
            WeightChannel::sum().with_size(2),
            WeightChannel::mean(),
        ]);
        // 1 + 2 + 1 value slots would need 5 with the count, so two passes
        assert_eq!(split.pass_count(), 2);

        let shared = plan(&[WeightChannel::sum(), WeightChannel::mean(), WeightChannel::mean()]);
        assert_eq!(shared.pass_count(), 1);
        let pass = &shared.passes[0];
        assert_eq!(pass.count_slot(), Some(3));
        assert_eq!(pass.used_slots(), 4);
    }

    #[test]
    fn test_conflicting_equations_split() {
        let plan = plan(&[WeightChannel::sum(), WeightChannel::max(), WeightChannel::min()]);
        assert_eq!(plan.pass_count(), 3);
        let bindings: Vec<_> = plan.passes.iter().map(|p| p.binding).collect();
        assert!(bindings.contains(&ADD_BLEND_EQUATION));
        assert!(bindings.contains(&MAX_BLEND_EQUATION));
        assert!(bindings.contains(&MIN_BLEND_EQUATION));
    }

    #[test]
    fn test_mean_with_min_keeps_count() {
        let plan = plan(&[WeightChannel::mean().with_min()]);
        assert_eq!(plan.pass_count(), 2);
        let primary = &plan.passes[0];
        assert_eq!(primary.kind, PassKind::Primary);
        assert!(primary.count_slot().is_some());
        assert!(primary.holds(0, Statistic::Value));
        let aux = &plan.passes[1];
        assert_eq!(aux.kind, PassKind::Auxiliary);
        assert!(aux.holds(0, Statistic::Min));
        let total: usize = plan.passes.iter().map(PassPlan::used_slots).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_combined_saves_a_pass() {
        let separate = plan(&[WeightChannel::sum().with_max_min(false)]);
        let combined = plan(&[WeightChannel::sum().with_max_min(true)]);
        assert_eq!(separate.pass_count(), 3);
        assert_eq!(combined.pass_count(), 2);

        let aux = &combined.passes[1];
        assert_eq!(aux.role, TargetRole::Companion);
        assert_eq!(aux.slot_of(0, Statistic::Max, 0), Some(0));
        assert_eq!(aux.slot_of(0, Statistic::Min, 0), Some(3));
    }

    #[test]
    fn test_combined_fallback_without_multi_slot() {
        let plan = plan_with(&[WeightChannel::sum().with_max_min(true)], false).unwrap();
        assert_eq!(plan.pass_count(), 3);
        assert!(plan.passes.iter().all(|p| p.binding.is_uniform()));
    }

    #[test]
    fn test_primary_passes_first() {
        let plan = plan(&[
            WeightChannel::sum().with_max(),
            WeightChannel::new(1, Operation::Max),
            WeightChannel::mean().with_min(),
        ]);
        let kinds: Vec<_> = plan.passes.iter().map(|p| p.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
    }

    #[test]
    fn test_every_channel_in_exactly_one_primary_pass() {
        let channels = [
            WeightChannel::sum().with_size(3),
            WeightChannel::mean().with_size(2),
            WeightChannel::min().with_size(4),
            WeightChannel::max(),
            WeightChannel::sum().with_min().with_max(),
        ];
        let plan = plan(&channels);
        for channel in 0..channels.len() {
            let primaries = plan
                .primary_passes()
                .filter(|p| p.holds(channel, Statistic::Value))
                .count();
            assert_eq!(primaries, 1, "channel {}", channel);
        }
        let min_passes = plan
            .auxiliary_passes()
            .filter(|p| p.holds(4, Statistic::Min))
            .count();
        assert_eq!(min_passes, 1);
    }

    #[test]
    fn test_auxiliary_requests_pack_together() {
        let plan = plan(&[WeightChannel::sum().with_max(), WeightChannel::sum().with_max()]);
        assert_eq!(plan.pass_count(), 2);
        assert_eq!(plan.auxiliary_passes().count(), 1);
    }

    #[test]
    fn test_too_many_passes() {
        let channels = vec![WeightChannel::sum().with_size(4); 20];
        let err = plan_with(&channels, true).unwrap_err();
        assert_eq!(
            err,
            AggregationError::Capacity(CapacityError::TooManyPasses {
                required: 20,
                max: 16
            })
        );
    }

    #[test]
    fn test_grid_exceeding_backend_limit() {
        let capabilities = BackendCapabilities {
            max_texture_dimension_2d: 2,
            ..Default::default()
        };
        let err = AggregationPlan::build(
            geometry(),
            &[WeightChannel::sum()],
            &capabilities,
            &AggregatorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AggregationError::Capacity(CapacityError::GridTooLarge { max: 2, .. })
        ));
    }

    #[test]
    fn test_splat_value_layout() {
        let plan = plan(&[WeightChannel::mean(), WeightChannel::sum().with_size(2)]);
        let pass = &plan.passes[0];
        let weights: [&[f32]; 2] = [&[5.0, 6.0], &[1.0, 2.0, 3.0, 4.0]];
        let value = pass.splat_value(&weights, &[1, 2], 1);
        assert_eq!(value[pass.slot_of(0, Statistic::Value, 0).unwrap()], 6.0);
        assert_eq!(value[pass.slot_of(1, Statistic::Value, 0).unwrap()], 3.0);
        assert_eq!(value[pass.slot_of(1, Statistic::Value, 1).unwrap()], 4.0);
        assert_eq!(value[pass.count_slot().unwrap()], 1.0);
    }
}
