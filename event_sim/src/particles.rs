//! Charged particles and their helices.
//!
//! A particle starts at its production vertex with transverse momentum `pt`,
//! azimuth `phi` and pseudorapidity `eta`. Its trajectory is expressed as a
//! perigee helix w.r.t. the origin so it can be propagated with the same
//! kernel the reconstruction uses.

use detector_models::{wrap_angle, DetectorLayout, HelixParams};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use tracking_core::BeamSpot;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: u64,
    /// Transverse momentum (GeV)
    pub pt: f64,
    /// Azimuth of flight at the vertex
    pub phi: f64,
    pub eta: f64,
    /// +1 or −1
    pub charge: i8,
    pub vertex: [f64; 3],
}

impl Particle {
    /// Perigee helix w.r.t. the origin.
    ///
    /// A positive particle in a field along +z bends clockwise, i.e. has
    /// negative curvature.
    pub fn helix(&self, layout: &DetectorLayout) -> HelixParams {
        let curvature = -f64::from(self.charge) * layout.curvature_for_pt(self.pt);
        let cot_theta = self.eta.sinh();
        let [vx, vy, vz] = self.vertex;

        // circle centre: one radius to the left of the direction of flight
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        let cx = vx - sin_phi / curvature;
        let cy = vy + cos_phi / curvature;
        let dist = cx.hypot(cy);
        let sign = curvature.signum();
        let (nx, ny) = (cx * sign / dist, cy * sign / dist);
        let phi0 = (-nx).atan2(ny);
        let d0 = sign * dist - 1.0 / curvature;

        // arc length from the perigee to the vertex (negative: vertex before perigee)
        let s = wrap_angle(self.phi - phi0) / curvature;
        HelixParams {
            curvature,
            phi0,
            d0,
            z0: vz - s * cot_theta,
            cot_theta,
        }
    }
}

/// Kinematic ranges for generated particles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleGun {
    pub n_particles: usize,
    pub pt_min: f64,
    pub pt_max: f64,
    pub eta_max: f64,
}

impl Default for ParticleGun {
    fn default() -> Self {
        Self {
            n_particles: 20,
            pt_min: 0.2,
            pt_max: 5.0,
            eta_max: 1.0,
        }
    }
}

impl ParticleGun {
    /// Primary vertex drawn from the beam spot.
    pub fn vertex<R: Rng>(&self, beam_spot: &BeamSpot, rng: &mut R) -> [f64; 3] {
        let gauss = |mean: f64, sigma: f64, rng: &mut R| {
            Normal::new(mean, sigma.max(1e-12)).map_or(mean, |d| d.sample(rng))
        };
        [
            gauss(beam_spot.x0, beam_spot.width_x, rng),
            gauss(beam_spot.y0, beam_spot.width_y, rng),
            gauss(beam_spot.z0, beam_spot.sigma_z, rng),
        ]
    }

    /// `n_particles` particles from `vertex`; pT is flat in 1/pT so low
    /// momenta dominate, as in minimum-bias events.
    pub fn shoot<R: Rng>(&self, vertex: [f64; 3], first_id: u64, rng: &mut R) -> Vec<Particle> {
        let inv = Uniform::new_inclusive(1.0 / self.pt_max, 1.0 / self.pt_min);
        let phi = Uniform::new(-std::f64::consts::PI, std::f64::consts::PI);
        let eta = Uniform::new_inclusive(-self.eta_max, self.eta_max);
        (0..self.n_particles)
            .map(|i| Particle {
                id: first_id + i as u64,
                pt: 1.0 / inv.sample(rng),
                phi: phi.sample(rng),
                eta: eta.sample(rng),
                charge: if rng.gen_bool(0.5) { 1 } else { -1 },
                vertex,
            })
            .collect()
    }
}
