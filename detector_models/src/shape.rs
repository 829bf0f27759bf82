//! Cluster-shape model: how long a pixel cluster should be along z for a
//! given track inclination.
//!
//! A track crossing a barrel sensor of thickness `t` with slope cot θ spans
//! Δz = t·|cot θ| inside the silicon, so it lights about Δz / pitch_z + 1
//! pixels along z. Clusters far longer or shorter than that were left by
//! something else (a looper, a δ-ray, an unrelated particle).

use crate::layout::DetectorLayer;
use serde::{Deserialize, Serialize};

/// Size of a cluster in readout cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterShape {
    pub size_rphi: u16,
    pub size_z: u16,
}

/// Compatibility window between a measured shape and a predicted inclination.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterShapeModel {
    /// Absolute tolerance (pixels)
    pub abs_tolerance: f64,
    /// Relative tolerance on the expected length
    pub rel_tolerance: f64,
}

impl Default for ClusterShapeModel {
    fn default() -> Self {
        Self {
            abs_tolerance: 1.5,
            rel_tolerance: 0.25,
        }
    }
}

impl ClusterShapeModel {
    /// Expected cluster length along z (pixels, fractional).
    pub fn expected_size_z(layer: &DetectorLayer, cot_theta: f64) -> f64 {
        layer.thickness * cot_theta.abs() / layer.pitch_z + 1.0
    }

    /// True if `shape` could have been left by a track with `cot_theta` on `layer`.
    pub fn is_compatible(&self, layer: &DetectorLayer, shape: ClusterShape, cot_theta: f64) -> bool {
        let expected = Self::expected_size_z(layer, cot_theta);
        let window = self.abs_tolerance + self.rel_tolerance * expected;
        (f64::from(shape.size_z) - expected).abs() <= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DetectorLayout;

    #[test]
    fn central_track_is_short_forward_track_is_long() {
        let layout = DetectorLayout::standard();
        let Some(bpix1) = layout.layer_by_name("BPix1") else {
            panic!("standard layout has BPix1");
        };
        let model = ClusterShapeModel::default();
        let short = ClusterShape { size_rphi: 2, size_z: 1 };
        let long = ClusterShape { size_rphi: 2, size_z: 9 };

        assert!(model.is_compatible(bpix1, short, 0.1));
        assert!(!model.is_compatible(bpix1, long, 0.1));
        // cot θ ≈ 4 (η ≈ 2.1): ~8.6 pixels expected
        assert!(model.is_compatible(bpix1, long, 4.0));
        assert!(!model.is_compatible(bpix1, short, 4.0));
    }
}
