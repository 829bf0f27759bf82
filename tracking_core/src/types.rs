//! Fundamental types used across the entire workspace.

use detector_models::{ClusterShape, LayerId, Technology};
use nalgebra::{Matrix5, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Numeric aliases. Lengths are centimetres, momenta GeV.
// ---------------------------------------------------------------------------

/// Global position [x, y, z]
pub type Vec3 = Vector3<f64>;

/// Covariance of the five helix parameters (ρ, φ0, d0, z0, cot θ)
pub type HelixCov = Matrix5<f64>;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

/// Event-wide cluster identifier; stable across iterations.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ClusterId(pub u64);

/// Index of a hit inside one iteration's [`HitCollection`](crate::local_hits::HitCollection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HitId(pub u32);

/// Index of a seed inside one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeedId(pub u32);

/// Event-wide track identifier. The upper 32 bits hold the iteration index.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

impl TrackId {
    pub fn new(iteration: usize, index: usize) -> Self {
        Self(((iteration as u64) << 32) | index as u64)
    }

    pub fn iteration(self) -> usize {
        (self.0 >> 32) as usize
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}

impl fmt::Display for SeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}.{}", self.iteration(), self.0 & 0xffff_ffff)
    }
}

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// A raw detector cluster, as delivered by the clusterizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub layer: LayerId,
    pub technology: Technology,
    /// Global position (cm). For mono strips z is the strip centre.
    pub position: [f64; 3],
    pub shape: ClusterShape,
    /// Collected charge (arbitrary units)
    pub charge: f64,
}

impl Cluster {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }
}

/// All clusters of one event (or the residual subset of an iteration).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventClusters {
    pub pixel: Vec<Cluster>,
    pub strip: Vec<Cluster>,
}

impl EventClusters {
    pub fn len(&self) -> usize {
        self.pixel.len() + self.strip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixel.is_empty() && self.strip.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.pixel.iter().chain(self.strip.iter())
    }
}

/// Luminous-region estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamSpot {
    pub x0: f64,
    pub y0: f64,
    pub z0: f64,
    /// Longitudinal spread (cm)
    pub sigma_z: f64,
    /// Transverse widths (cm)
    pub width_x: f64,
    pub width_y: f64,
}

impl Default for BeamSpot {
    fn default() -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            z0: 0.0,
            sigma_z: 3.8,
            width_x: 0.0015,
            width_y: 0.0015,
        }
    }
}

impl BeamSpot {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x0, self.y0, self.z0)
    }
}

/// One event: clusters, beam spot and (optionally) already reconstructed primary vertices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub number: u64,
    pub clusters: EventClusters,
    pub beam_spot: BeamSpot,
    #[serde(default)]
    pub vertices: Vec<[f64; 3]>,
}

impl Event {
    pub fn vertex_positions(&self) -> Vec<Vec3> {
        self.vertices
            .iter()
            .map(|v| Vec3::new(v[0], v[1], v[2]))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Quality levels
// ---------------------------------------------------------------------------

/// Track quality level a tier grants. Ordered: loose < tight < highPurity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackQuality {
    Loose,
    Tight,
    HighPurity,
}

impl fmt::Display for TrackQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackQuality::Loose => "loose",
            TrackQuality::Tight => "tight",
            TrackQuality::HighPurity => "highPurity",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_id_packs_iteration() {
        let id = TrackId::new(2, 17);
        assert_eq!(id.iteration(), 2);
        assert_eq!(id.to_string(), "T2.17");
    }

    #[test]
    fn quality_order_and_names() {
        assert!(TrackQuality::Loose < TrackQuality::Tight);
        assert!(TrackQuality::Tight < TrackQuality::HighPurity);
        let json = serde_json::to_string(&TrackQuality::HighPurity).unwrap_or_default();
        assert_eq!(json, "\"highPurity\"");
    }
}
