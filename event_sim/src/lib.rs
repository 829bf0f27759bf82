//! `event_sim`: Event simulator: particles, detector response, event logs.

pub mod detector_sim;
pub mod particles;
pub mod replay;
pub mod scenarios;

pub use detector_sim::{DetectorSimConfig, DetectorSimulator, SimulatedEvent};
pub use particles::{Particle, ParticleGun};
pub use replay::{load_log, save_log, EventLog};
pub use scenarios::{Scenario, ScenarioKind};
