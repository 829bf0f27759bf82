//! Hit pool manager: removes clusters already used by good tracks of earlier
//! iterations.
//!
//! # Policy
//! - A prior track releases its clusters for removal only if its normalized
//!   fit χ² is below `max_chi2`. `max_chi2 = 0` disables removal by tracks,
//!   which runs the iteration on the untouched pool of the previous one.
//! - Removals chain: everything in the previous removal record stays removed.
//! - No prior tracks and no previous record: the residual pool is the full set.

use crate::{
    fitter::FittedTrack,
    types::{ClusterId, EventClusters, TrackId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Configuration of the hit pool manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HitPoolConfig {
    /// Normalized χ² below which a prior track's clusters are removed
    pub max_chi2: f64,
}

impl Default for HitPoolConfig {
    fn default() -> Self {
        Self { max_chi2: 30.0 }
    }
}

/// Which clusters were removed, and by which track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRemovalRecord {
    /// Number of iterations folded into this record
    pub generation: u32,
    /// Cumulative removed clusters, including those inherited from earlier records
    pub removed: BTreeSet<ClusterId>,
    /// Clusters attributed to each prior track in this generation
    pub per_track: BTreeMap<TrackId, Vec<ClusterId>>,
}

impl ClusterRemovalRecord {
    pub fn contains(&self, id: ClusterId) -> bool {
        self.removed.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Residual pool plus the record that produced it.
#[derive(Clone, Debug, Default)]
pub struct HitPoolOutput {
    pub residual: EventClusters,
    pub record: ClusterRemovalRecord,
    /// Clusters of the input that were dropped
    pub n_removed: usize,
}

#[derive(Clone, Debug)]
pub struct HitPoolManager {
    pub config: HitPoolConfig,
}

impl HitPoolManager {
    pub fn new(config: HitPoolConfig) -> Self {
        Self { config }
    }

    /// Build the residual cluster pool for this iteration.
    pub fn build(
        &self,
        all: &EventClusters,
        prior_tracks: &[&FittedTrack],
        previous: Option<&ClusterRemovalRecord>,
    ) -> HitPoolOutput {
        let mut record = ClusterRemovalRecord {
            generation: previous.map_or(0, |p| p.generation) + 1,
            removed: previous.map(|p| p.removed.clone()).unwrap_or_default(),
            per_track: BTreeMap::new(),
        };

        if self.config.max_chi2 > 0.0 {
            for track in prior_tracks {
                if track.normalized_chi2() >= self.config.max_chi2 {
                    continue;
                }
                let mut clusters = track.clusters.clone();
                clusters.sort_unstable();
                clusters.dedup();
                record.removed.extend(clusters.iter().copied());
                record.per_track.insert(track.id, clusters);
            }
        }

        let keep = |c: &&crate::types::Cluster| !record.removed.contains(&c.id);
        let residual = EventClusters {
            pixel: all.pixel.iter().filter(keep).cloned().collect(),
            strip: all.strip.iter().filter(keep).cloned().collect(),
        };
        let n_removed = all.len() - residual.len();

        tracing::debug!(
            generation = record.generation,
            prior_tracks = prior_tracks.len(),
            removed = n_removed,
            residual = residual.len(),
            "hit pool built"
        );

        HitPoolOutput {
            residual,
            record,
            n_removed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
