//! Global tracking region around the beam spot.
//!
//! A seed is kept only if its helix estimate has pT ≥ `pt_min`, passes within
//! `origin_radius` of the beam line and crosses it within
//! `n_sigma_z × σz` of the beam-spot centre.

use crate::types::{BeamSpot, Vec3};
use detector_models::{DetectorLayout, HelixParams};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Minimum transverse momentum (GeV)
    pub pt_min: f64,
    /// Maximum transverse distance from the beam line (cm)
    pub origin_radius: f64,
    /// Longitudinal window in units of the beam-spot σz
    pub n_sigma_z: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            pt_min: 0.075,
            origin_radius: 0.2,
            n_sigma_z: 3.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackingRegion {
    pub origin: Vec3,
    pub origin_radius: f64,
    pub z_half_length: f64,
    pub pt_min: f64,
    /// |ρ| of a pt_min track (1/cm)
    pub max_curvature: f64,
}

impl TrackingRegion {
    pub fn from_beam_spot(config: &RegionConfig, beam_spot: &BeamSpot, layout: &DetectorLayout) -> Self {
        Self {
            origin: beam_spot.position(),
            origin_radius: config.origin_radius,
            z_half_length: config.n_sigma_z * beam_spot.sigma_z,
            pt_min: config.pt_min,
            max_curvature: layout.curvature_for_pt(config.pt_min),
        }
    }

    pub fn accepts(&self, params: &HelixParams) -> bool {
        if params.curvature.abs() > self.max_curvature {
            return false;
        }
        if params.d0_wrt(self.origin.x, self.origin.y).abs() > self.origin_radius {
            return false;
        }
        let z = params.z0_wrt(self.origin.x, self.origin.y);
        (z - self.origin.z).abs() <= self.z_half_length
    }

    /// z interval an outer hit at `radius` may occupy, given an inner hit, if
    /// the track comes from the region's luminous segment.
    pub fn z_window_at(&self, inner: &Vec3, radius: f64) -> (f64, f64) {
        let r_in = inner.xy().norm().max(1e-6);
        let scale = radius / r_in;
        let z_lo = self.origin.z - self.z_half_length;
        let z_hi = self.origin.z + self.z_half_length;
        // straight lines from both ends of the segment through the inner hit
        let a = z_lo + (inner.z - z_lo) * scale;
        let b = z_hi + (inner.z - z_hi) * scale;
        (a.min(b), a.max(b))
    }
}
