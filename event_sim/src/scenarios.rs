//! Scenario definitions.
//!
//! Each scenario is a named particle gun, beam spot and detector response.
//! All scenarios are deterministic given the same seed.

use crate::{
    detector_sim::{DetectorSimConfig, DetectorSimulator, SimulatedEvent},
    particles::ParticleGun,
};
use detector_models::DetectorLayout;
use serde::{Deserialize, Serialize};
use tracking_core::BeamSpot;

/// Which pre-defined scenario to load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One particle per event, perfect detector
    Single,
    /// 20 soft particles (0.1 - 1 GeV), light noise
    LowPt,
    /// 50 particles over 0.2 - 20 GeV with noise and inefficiency
    Mixed,
    /// 500 particles per event, heavy noise: scalability stress test
    Dense,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub n_events: u64,
    pub gun: ParticleGun,
    pub beam_spot: BeamSpot,
    pub detector: DetectorSimConfig,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Single => Self::single(seed),
            ScenarioKind::LowPt => Self::low_pt(seed),
            ScenarioKind::Mixed => Self::mixed(seed),
            ScenarioKind::Dense => Self::dense(seed),
        }
    }

    /// Simulate every event of the scenario.
    pub fn generate(&self, layout: &DetectorLayout) -> Vec<SimulatedEvent> {
        let mut sim = DetectorSimulator::new(layout.clone(), self.detector.clone(), self.seed);
        (0..self.n_events)
            .map(|n| sim.simulate_event(n, &self.gun, &self.beam_spot))
            .collect()
    }

    fn single(seed: u64) -> Self {
        Scenario {
            name: "single".into(),
            seed,
            n_events: 10,
            gun: ParticleGun {
                n_particles: 1,
                pt_min: 0.5,
                pt_max: 10.0,
                eta_max: 0.8,
            },
            beam_spot: BeamSpot::default(),
            detector: DetectorSimConfig {
                hit_efficiency: 1.0,
                pixel_noise: 0.0,
                strip_noise: 0.0,
                smear: true,
                with_vertices: true,
            },
        }
    }

    fn low_pt(seed: u64) -> Self {
        Scenario {
            name: "low_pt".into(),
            seed,
            n_events: 20,
            gun: ParticleGun {
                n_particles: 20,
                pt_min: 0.1,
                pt_max: 1.0,
                eta_max: 1.0,
            },
            beam_spot: BeamSpot::default(),
            detector: DetectorSimConfig {
                pixel_noise: 1.0,
                strip_noise: 2.0,
                ..Default::default()
            },
        }
    }

    fn mixed(seed: u64) -> Self {
        Scenario {
            name: "mixed".into(),
            seed,
            n_events: 20,
            gun: ParticleGun {
                n_particles: 50,
                pt_min: 0.2,
                pt_max: 20.0,
                eta_max: 1.2,
            },
            beam_spot: BeamSpot::default(),
            detector: DetectorSimConfig {
                hit_efficiency: 0.97,
                ..Default::default()
            },
        }
    }

    fn dense(seed: u64) -> Self {
        Scenario {
            name: "dense".into(),
            seed,
            n_events: 5,
            gun: ParticleGun {
                n_particles: 500,
                pt_min: 0.2,
                pt_max: 10.0,
                eta_max: 1.2,
            },
            beam_spot: BeamSpot::default(),
            detector: DetectorSimConfig {
                hit_efficiency: 0.97,
                pixel_noise: 20.0,
                strip_noise: 60.0,
                ..Default::default()
            },
        }
    }
}
