// SPDX-License-Identifier: GPL-3.0-only

//! Point data sources
//!
//! The aggregator reads positions and per-channel weight arrays through
//! [`PointSource`]. [`PointCloud`] is the owned implementation, loadable from
//! JSON documents and LAS/LAZ files.

use crate::errors::{AggregationError, AggregationResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Positions plus one flat weight array per channel.
///
/// Channel `c` holds `len() * size` values, components interleaved per point.
pub trait PointSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn positions(&self) -> &[[f32; 2]];

    fn weights(&self, channel: usize) -> Option<&[f32]>;

    /// Number of weight channels, when the source knows it
    fn channel_count(&self) -> Option<usize> {
        None
    }
}

/// Owned point set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub positions: Vec<[f32; 2]>,
    #[serde(default)]
    pub weights: Vec<Vec<f32>>,
}

impl PointSource for PointCloud {
    fn len(&self) -> usize {
        self.positions.len()
    }

    fn positions(&self) -> &[[f32; 2]] {
        &self.positions
    }

    fn weights(&self, channel: usize) -> Option<&[f32]> {
        self.weights.get(channel).map(Vec::as_slice)
    }

    fn channel_count(&self) -> Option<usize> {
        Some(self.weights.len())
    }
}

/// Per-point LAS attribute usable as a weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LasAttribute {
    /// Elevation
    Z,
    /// Return intensity
    Intensity,
    /// Constant 1, turns SUM into a point count
    One,
}

impl LasAttribute {
    pub const ALL: [LasAttribute; 3] =
        [LasAttribute::Z, LasAttribute::Intensity, LasAttribute::One];

    pub fn name(&self) -> &'static str {
        match self {
            LasAttribute::Z => "z",
            LasAttribute::Intensity => "intensity",
            LasAttribute::One => "one",
        }
    }

    fn sample(&self, point: &las::Point) -> f32 {
        match self {
            LasAttribute::Z => point.z as f32,
            LasAttribute::Intensity => f32::from(point.intensity),
            LasAttribute::One => 1.0,
        }
    }
}

impl FromStr for LasAttribute {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LasAttribute::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AggregationError::Parse(format!("unknown LAS attribute: {}", s)))
    }
}

impl PointCloud {
    pub fn new(positions: Vec<[f32; 2]>) -> Self {
        Self {
            positions,
            weights: Vec::new(),
        }
    }

    /// Append a weight channel
    pub fn with_channel(mut self, weights: Vec<f32>) -> Self {
        self.weights.push(weights);
        self
    }

    pub fn from_json(json: &str) -> AggregationResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_json(path: &Path) -> AggregationResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let cloud = Self::from_json(&json)?;
        debug!(path = %path.display(), points = cloud.len(), "Loaded JSON points");
        Ok(cloud)
    }

    /// Read a LAS or LAZ file.
    ///
    /// Each entry of `channels` lists the attributes of one weight channel,
    /// interleaved per point.
    pub fn load_las(path: &Path, channels: &[Vec<LasAttribute>]) -> AggregationResult<Self> {
        let mut reader = las::Reader::from_path(path)?;

        let mut positions = Vec::new();
        let mut weights = vec![Vec::new(); channels.len()];
        for point in reader.points() {
            let point = point?;
            positions.push([point.x as f32, point.y as f32]);
            for (channel, attributes) in weights.iter_mut().zip(channels) {
                channel.extend(attributes.iter().map(|a| a.sample(&point)));
            }
        }

        info!(
            path = %path.display(),
            points = positions.len(),
            channels = channels.len(),
            "Loaded LAS points"
        );
        Ok(Self { positions, weights })
    }

    /// Load by extension: `.las`/`.laz` through the LAS reader, anything else as JSON
    pub fn load(path: &Path, las_channels: &[Vec<LasAttribute>]) -> AggregationResult<Self> {
        let is_las = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("las") || e.eq_ignore_ascii_case("laz"));
        if is_las {
            Self::load_las(path, las_channels)
        } else {
            Self::load_json(path)
        }
    }
}

/// Assign LAS attributes to the components of channels with `sizes`.
///
/// Without explicit attributes every component weighs one. Explicit
/// attributes fill the components in channel order and must cover them
/// exactly.
pub fn las_channel_layout(
    sizes: &[usize],
    attributes: &[LasAttribute],
) -> AggregationResult<Vec<Vec<LasAttribute>>> {
    if attributes.is_empty() {
        return Ok(sizes.iter().map(|&size| vec![LasAttribute::One; size]).collect());
    }

    let needed: usize = sizes.iter().sum();
    if attributes.len() != needed {
        return Err(AggregationError::Parse(format!(
            "{} LAS attributes given for {} channel components",
            attributes.len(),
            needed
        )));
    }

    let mut rest = attributes;
    Ok(sizes
        .iter()
        .map(|&size| {
            let (head, tail) = rest.split_at(size);
            rest = tail;
            head.to_vec()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_cloud_source() {
        let cloud = PointCloud::new(vec![[0.0, 0.0], [1.0, 1.0]])
            .with_channel(vec![1.0, 2.0])
            .with_channel(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(cloud.len(), 2);
        assert!(!cloud.is_empty());
        assert_eq!(cloud.weights(1), Some(&[1.0, 2.0, 3.0, 4.0][..]));
        assert_eq!(cloud.weights(2), None);
    }

    #[test]
    fn test_json_document() {
        let cloud =
            PointCloud::from_json(r#"{"positions": [[0.5, 1.5]], "weights": [[3.0]]}"#).unwrap();
        assert_eq!(cloud.positions, vec![[0.5, 1.5]]);
        assert_eq!(cloud.weights, vec![vec![3.0]]);

        let bare = PointCloud::from_json(r#"{"positions": []}"#).unwrap();
        assert!(bare.is_empty());
        assert!(bare.weights.is_empty());
    }

    #[test]
    fn test_las_attribute_names() {
        assert_eq!("Z".parse::<LasAttribute>().unwrap(), LasAttribute::Z);
        assert_eq!(
            "intensity".parse::<LasAttribute>().unwrap(),
            LasAttribute::Intensity
        );
        assert!("rgb".parse::<LasAttribute>().is_err());
    }

    #[test]
    fn test_las_layout_defaults_cover_vector_channels() {
        let layout = las_channel_layout(&[1, 3], &[]).unwrap();
        assert_eq!(layout, vec![vec![LasAttribute::One], vec![LasAttribute::One; 3]]);
    }

    #[test]
    fn test_las_layout_explicit_attributes() {
        use LasAttribute::{Intensity, One, Z};

        let layout = las_channel_layout(&[2, 1], &[Z, Intensity, One]).unwrap();
        assert_eq!(layout, vec![vec![Z, Intensity], vec![One]]);

        let err = las_channel_layout(&[2], &[Z]).unwrap_err();
        assert!(matches!(err, AggregationError::Parse(_)));
    }
}
