//! Detector response: particles → clusters.
//!
//! For every particle the helix is crossed with each barrel layer:
//! - hit efficiency: a crossing leaves a cluster with probability `hit_efficiency`
//! - acceptance: crossings beyond the layer half-length leave nothing
//! - smearing: Gaussian in r-φ and z with the layer resolutions
//! - mono strips report the z of the strip centre; stereo strips report the
//!   z on the mono reference surface of their pair
//! - noise: Poisson-distributed random clusters per layer
//!
//! All randomness flows from one `ChaCha8Rng`, so a seed fully determines the
//! event sequence.

use crate::particles::{Particle, ParticleGun};
use detector_models::{
    ClusterShape, ClusterShapeModel, DetectorLayer, DetectorLayout, HelixParams, StripSide,
    Technology,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Normal, Poisson};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracking_core::{BeamSpot, Cluster, ClusterId, Event, EventClusters, ParticleTruth};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorSimConfig {
    pub hit_efficiency: f64,
    /// Mean number of noise clusters per pixel layer
    pub pixel_noise: f64,
    /// Mean number of noise clusters per strip layer
    pub strip_noise: f64,
    /// Disable to place clusters exactly on the helix
    pub smear: bool,
    /// Publish the true primary vertex alongside the beam spot
    pub with_vertices: bool,
}

impl Default for DetectorSimConfig {
    fn default() -> Self {
        Self {
            hit_efficiency: 0.98,
            pixel_noise: 2.0,
            strip_noise: 5.0,
            smear: true,
            with_vertices: true,
        }
    }
}

/// One simulated event and what produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulatedEvent {
    pub event: Event,
    pub particles: Vec<Particle>,
    pub truth: Vec<ParticleTruth>,
}

pub struct DetectorSimulator {
    pub layout: DetectorLayout,
    pub config: DetectorSimConfig,
    rng: ChaCha8Rng,
}

impl DetectorSimulator {
    pub fn new(layout: DetectorLayout, config: DetectorSimConfig, seed: u64) -> Self {
        Self {
            layout,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Generate the next event.
    pub fn simulate_event(&mut self, number: u64, gun: &ParticleGun, beam_spot: &BeamSpot) -> SimulatedEvent {
        let vertex = gun.vertex(beam_spot, &mut self.rng);
        let particles = gun.shoot(vertex, number * 100_000, &mut self.rng);

        let mut clusters = EventClusters::default();
        let mut next_id = number * 1_000_000;
        let mut truth = Vec::with_capacity(particles.len());
        for p in &particles {
            let helix = p.helix(&self.layout);
            let own = self.particle_clusters(&helix, &mut next_id);
            let pixel_layers: BTreeSet<_> = own
                .iter()
                .filter(|c| c.technology == Technology::Pixel)
                .map(|c| c.layer)
                .collect();
            let all_layers: BTreeSet<_> = own
                .iter()
                .filter(|c| self.is_mono_or_pixel(c))
                .map(|c| c.layer)
                .collect();
            truth.push(ParticleTruth {
                particle: p.id,
                pt: p.pt,
                clusters: own.iter().map(|c| c.id).collect(),
                reconstructable: pixel_layers.len() == 3 && all_layers.len() >= 5,
            });
            for c in own {
                push(&mut clusters, c);
            }
        }
        for c in self.noise_clusters(&mut next_id) {
            push(&mut clusters, c);
        }

        tracing::debug!(
            event = number,
            particles = particles.len(),
            pixel = clusters.pixel.len(),
            strip = clusters.strip.len(),
            "event simulated"
        );

        SimulatedEvent {
            event: Event {
                number,
                clusters,
                beam_spot: beam_spot.clone(),
                vertices: if self.config.with_vertices {
                    vec![vertex]
                } else {
                    Vec::new()
                },
            },
            particles,
            truth,
        }
    }

    fn is_mono_or_pixel(&self, c: &Cluster) -> bool {
        self.layout
            .layer(c.layer)
            .is_some_and(|l| l.side != Some(StripSide::Stereo))
    }

    fn gauss(&mut self, sigma: f64) -> f64 {
        if !self.config.smear {
            return 0.0;
        }
        Normal::new(0.0, sigma).map_or(0.0, |d| d.sample(&mut self.rng))
    }

    fn particle_clusters(&mut self, helix: &HelixParams, next_id: &mut u64) -> Vec<Cluster> {
        let layers = self.layout.layers.clone();
        let mut out = Vec::new();
        for layer in &layers {
            let Some(crossing) = helix.intersect_radius(layer.radius) else {
                continue;
            };
            // stereo z is measured at the mono partner's radius
            let mono_radius = layers
                .iter()
                .find(|l| l.stereo_partner == Some(layer.id))
                .map_or(layer.radius, |mono| mono.radius);
            let Some(z_crossing) = helix.intersect_radius(mono_radius) else {
                continue;
            };
            let true_z = z_crossing.position.z;
            if crossing.position.z.abs() > layer.half_length || true_z.abs() > layer.half_length {
                continue;
            }
            if self.rng.gen::<f64>() >= self.config.hit_efficiency {
                continue;
            }

            let phi = crossing.position.y.atan2(crossing.position.x)
                + self.gauss(layer.sigma_rphi) / layer.radius;
            let z = match (layer.technology, layer.side) {
                (Technology::Strip, Some(StripSide::Mono)) => strip_centre(true_z, layer.pitch_z),
                _ => true_z + self.gauss(layer.sigma_z),
            };
            let size_z = ClusterShapeModel::expected_size_z(layer, helix.cot_theta).round() as u16;
            out.push(cluster(
                next_id,
                layer,
                phi,
                z,
                ClusterShape {
                    size_rphi: 2,
                    size_z: size_z.max(1),
                },
            ));
        }
        out
    }

    fn noise_clusters(&mut self, next_id: &mut u64) -> Vec<Cluster> {
        let layers = self.layout.layers.clone();
        let mut out = Vec::new();
        for layer in &layers {
            let mean = match layer.technology {
                Technology::Pixel => self.config.pixel_noise,
                Technology::Strip => self.config.strip_noise,
            };
            let Ok(poisson) = Poisson::new(mean) else {
                continue;
            };
            let n = poisson.sample(&mut self.rng) as usize;
            for _ in 0..n {
                let phi = self.rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI);
                let z = self.rng.gen_range(-layer.half_length..layer.half_length);
                let z = if layer.side == Some(StripSide::Mono) {
                    strip_centre(z, layer.pitch_z)
                } else {
                    z
                };
                let shape = ClusterShape {
                    size_rphi: self.rng.gen_range(1..=3),
                    size_z: self.rng.gen_range(1..=4),
                };
                out.push(cluster(next_id, layer, phi, z, shape));
            }
        }
        out
    }
}

fn strip_centre(z: f64, pitch: f64) -> f64 {
    ((z / pitch).floor() + 0.5) * pitch
}

fn cluster(next_id: &mut u64, layer: &DetectorLayer, phi: f64, z: f64, shape: ClusterShape) -> Cluster {
    let id = ClusterId(*next_id);
    *next_id += 1;
    Cluster {
        id,
        layer: layer.id,
        technology: layer.technology,
        position: [layer.radius * phi.cos(), layer.radius * phi.sin(), z],
        shape,
        charge: 1.0,
    }
}

fn push(clusters: &mut EventClusters, c: Cluster) {
    match c.technology {
        Technology::Pixel => clusters.pixel.push(c),
        Technology::Strip => clusters.strip.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> DetectorSimConfig {
        DetectorSimConfig {
            hit_efficiency: 1.0,
            pixel_noise: 0.0,
            strip_noise: 0.0,
            smear: false,
            with_vertices: true,
        }
    }

    fn gun(n: usize) -> ParticleGun {
        ParticleGun {
            n_particles: n,
            pt_min: 1.0,
            pt_max: 2.0,
            eta_max: 0.5,
        }
    }

    #[test]
    fn central_particle_crosses_every_layer() {
        let mut sim = DetectorSimulator::new(DetectorLayout::standard(), quiet(), 1);
        let ev = sim.simulate_event(0, &gun(1), &BeamSpot::default());
        assert_eq!(ev.event.clusters.pixel.len(), 3);
        assert_eq!(ev.event.clusters.strip.len(), 6);
        assert_eq!(ev.truth.len(), 1);
        assert!(ev.truth[0].reconstructable);
        assert_eq!(ev.truth[0].clusters.len(), 9);
        assert_eq!(ev.event.vertices.len(), 1);
    }

    #[test]
    fn same_seed_same_events() {
        let config = DetectorSimConfig::default();
        let mut a = DetectorSimulator::new(DetectorLayout::standard(), config.clone(), 9);
        let mut b = DetectorSimulator::new(DetectorLayout::standard(), config, 9);
        for n in 0..3 {
            let ea = a.simulate_event(n, &gun(10), &BeamSpot::default());
            let eb = b.simulate_event(n, &gun(10), &BeamSpot::default());
            assert_eq!(ea.event, eb.event);
            assert_eq!(ea.particles, eb.particles);
        }
    }

    #[test]
    fn noise_only_event_has_no_truth() {
        let config = DetectorSimConfig {
            pixel_noise: 5.0,
            ..quiet()
        };
        let mut sim = DetectorSimulator::new(DetectorLayout::standard(), config, 4);
        let ev = sim.simulate_event(0, &gun(0), &BeamSpot::default());
        assert!(ev.truth.is_empty());
        assert!(ev.event.clusters.strip.is_empty());
        let ids: BTreeSet<_> = ev.event.clusters.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), ev.event.clusters.len());
    }

    #[test]
    fn mono_strips_report_strip_centres() {
        assert_eq!(strip_centre(0.3, 10.0), 5.0);
        assert_eq!(strip_centre(-0.3, 10.0), -5.0);
    }
}
