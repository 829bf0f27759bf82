//! `tracking_core`: Iterative track reconstruction.
//!
//! One iteration turns the clusters a previous iteration left unused into
//! a merged, quality-tagged track collection plus an updated removal record.
//!
//! # Module layout
//! - [`types`]         : Ids, clusters, events, beam spot, quality flags
//! - [`hit_pool`]      : Cluster removal from good prior tracks
//! - [`local_hits`]    : Pixel hits and matched / single strip hits
//! - [`seeding_layers`]: Named seeding layer sets
//! - [`region`]        : Global tracking region around the beam spot
//! - [`seed_generator`]: Triplet seeds, region and cluster-shape filters
//! - [`builder`]       : Combinatorial trajectory building (candidate tree)
//! - [`candidates`]    : Best path per seed, rebuilding, hit splitting
//! - [`fitter`]        : Final helix fit
//! - [`quality`]       : Tier graph and per-track classification
//! - [`merger`]        : Track list merging with duplicate removal
//! - [`pipeline`]      : Iteration orchestrator and iteration chain
//! - [`metrics`]       : Per-iteration counters and truth-matched rates
//! - [`error`]         : Configuration errors

pub mod builder;
pub mod candidates;
pub mod error;
pub mod fitter;
pub mod hit_pool;
pub mod local_hits;
pub mod merger;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod region;
pub mod seed_generator;
pub mod seeding_layers;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ConfigError;
pub use fitter::FittedTrack;
pub use hit_pool::ClusterRemovalRecord;
pub use merger::{MergedTrack, MergedTrackCollection};
pub use metrics::{IterationStats, ParticleTruth, ReconstructionMetrics};
pub use pipeline::{
    IterativeTracker, Iteration, IterationConfig, IterationContext, IterationOutput, TrackerOutput,
};
pub use types::{
    BeamSpot, Cluster, ClusterId, Event, EventClusters, HitId, SeedId, TrackId, TrackQuality,
};
