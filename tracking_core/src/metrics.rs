//! Reconstruction metrics: per-stage counters of an iteration and
//! truth-matched efficiency / fake / duplicate rates.

use crate::{fitter::FittedTrack, types::ClusterId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fraction of a track's hits that must come from one particle for a match.
pub const MATCH_FRACTION: f64 = 0.75;

/// Counters and timings of one iteration on one event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    pub clusters_in: usize,
    pub clusters_removed: usize,
    pub hits: usize,
    pub unmatched_stereo: usize,
    pub seeds: usize,
    pub seeds_rejected_region: usize,
    pub seeds_rejected_shape: usize,
    pub seeding_skipped: bool,
    pub builder_nodes: usize,
    pub builder_pruned: usize,
    pub builder_cleaned: usize,
    pub builder_budget_exhausted: usize,
    pub candidates: usize,
    pub candidates_dropped: usize,
    pub fitted: usize,
    pub fit_failures: usize,
    /// Tracks passing each tier, in declaration order
    pub tier_passed: Vec<(String, usize)>,
    pub merged: usize,
    pub duplicates_removed: usize,
    /// Timings in microseconds
    pub timing_hit_pool_us: u64,
    pub timing_local_hits_us: u64,
    pub timing_seeding_us: u64,
    pub timing_building_us: u64,
    pub timing_fit_us: u64,
    pub timing_classify_us: u64,
    pub timing_merge_us: u64,
    pub total_time_us: u64,
}

/// Simulated particle and the clusters it left.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleTruth {
    pub particle: u64,
    pub pt: f64,
    pub clusters: Vec<ClusterId>,
    /// Expected to be found by the iteration (enough layers, inside acceptance)
    pub reconstructable: bool,
}

/// Accumulated truth-matching statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReconstructionMetrics {
    pub n_events: u64,
    pub n_tracks: u64,
    pub n_reconstructable: u64,
    /// Reconstructable particles matched by at least one track
    pub n_found: u64,
    /// Tracks not matched to any particle
    pub n_fake: u64,
    /// Extra tracks matched to an already matched particle
    pub n_duplicate: u64,
}

impl ReconstructionMetrics {
    /// found / reconstructable
    pub fn efficiency(&self) -> f64 {
        if self.n_reconstructable == 0 {
            return 0.0;
        }
        self.n_found as f64 / self.n_reconstructable as f64
    }

    /// fake / tracks
    pub fn fake_rate(&self) -> f64 {
        if self.n_tracks == 0 {
            return 0.0;
        }
        self.n_fake as f64 / self.n_tracks as f64
    }

    pub fn duplicate_rate(&self) -> f64 {
        if self.n_tracks == 0 {
            return 0.0;
        }
        self.n_duplicate as f64 / self.n_tracks as f64
    }

    /// Particle a track is matched to, if any.
    pub fn match_track(track: &FittedTrack, owner: &BTreeMap<ClusterId, u64>) -> Option<u64> {
        let mut votes: BTreeMap<u64, usize> = BTreeMap::new();
        for c in &track.primary_clusters {
            if let Some(p) = owner.get(c) {
                *votes.entry(*p).or_default() += 1;
            }
        }
        let n = track.primary_clusters.len().max(1) as f64;
        votes
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .filter(|(_, v)| *v as f64 / n >= MATCH_FRACTION)
            .map(|(p, _)| p)
    }

    /// Accumulate one event.
    pub fn accumulate(&mut self, tracks: &[&FittedTrack], truth: &[ParticleTruth]) {
        self.n_events += 1;
        self.n_tracks += tracks.len() as u64;

        let owner: BTreeMap<ClusterId, u64> = truth
            .iter()
            .flat_map(|p| p.clusters.iter().map(move |c| (*c, p.particle)))
            .collect();

        let mut matched: BTreeSet<u64> = BTreeSet::new();
        for track in tracks {
            match Self::match_track(track, &owner) {
                Some(p) => {
                    if !matched.insert(p) {
                        self.n_duplicate += 1;
                    }
                }
                None => self.n_fake += 1,
            }
        }

        for p in truth.iter().filter(|p| p.reconstructable) {
            self.n_reconstructable += 1;
            if matched.contains(&p.particle) {
                self.n_found += 1;
            }
        }
    }
}
