//! Candidate manager: from candidate trees to one hit list per track.
//!
//! Per seed the accepted leaves are ranked by (valid hits desc, score desc,
//! arena id asc) and the best `max_candidates_per_seed` are kept.
//!
//! - **Seeding-region rebuilding**: the starting parameters are re-estimated
//!   from the full hit span (first hit, outermost 3D hit and one in between)
//!   and the region of validity widened to all hits. Off: the leaf's own
//!   estimate is used and the region is the seed's span.
//! - **Hit splitting**: on, a hit may belong to several candidates, which
//!   are flagged. Off, candidates are visited best first and hits already
//!   claimed are removed from later ones; those left below the minimum hit
//!   count are dropped.

use crate::{
    builder::{BuildOutput, CandidateId, SeedTrajectories},
    local_hits::HitCollection,
    types::{HitId, SeedId},
};
use detector_models::{HelixParams, LayerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CandidateManagerConfig {
    pub do_seeding_region_rebuilding: bool,
    pub use_hits_splitting: bool,
    pub max_candidates_per_seed: usize,
}

impl Default for CandidateManagerConfig {
    fn default() -> Self {
        Self {
            do_seeding_region_rebuilding: true,
            use_hits_splitting: true,
            max_candidates_per_seed: 1,
        }
    }
}

/// Span of the detector a candidate's parameters are valid in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionOfValidity {
    pub r_min: f64,
    pub r_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl RegionOfValidity {
    fn spanning(hits: &HitCollection, ids: &[HitId]) -> Self {
        let mut region = Self {
            r_min: f64::INFINITY,
            r_max: f64::NEG_INFINITY,
            z_min: f64::INFINITY,
            z_max: f64::NEG_INFINITY,
        };
        for &id in ids {
            let hit = hits.get(id);
            region.r_min = region.r_min.min(hit.radius());
            region.r_max = region.r_max.max(hit.radius());
            region.z_min = region.z_min.min(hit.position.z);
            region.z_max = region.z_max.max(hit.position.z);
        }
        region
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackCandidate {
    pub seed: SeedId,
    /// Leaf of the candidate tree this path ends in
    pub leaf: CandidateId,
    /// Valid hits, inside out
    pub hits: Vec<HitId>,
    /// Layers with a lost hit before the last valid hit
    pub lost_layers: Vec<LayerId>,
    pub score: f64,
    /// Starting parameters for the final fit
    pub params: HelixParams,
    pub region: RegionOfValidity,
    /// Shares at least one hit with another candidate
    pub hits_split: bool,
    pub seeding_region_rebuilt: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CandidateOutput {
    pub candidates: Vec<TrackCandidate>,
    /// Candidates left below the minimum after claimed hits were removed
    pub n_dropped: usize,
}

#[derive(Clone, Debug)]
pub struct CandidateManager {
    pub config: CandidateManagerConfig,
    /// Smallest hit count a candidate may be left with
    pub min_hits: usize,
}

impl CandidateManager {
    pub fn new(config: CandidateManagerConfig, min_hits: usize) -> Self {
        Self { config, min_hits }
    }

    pub fn select(&self, hits: &HitCollection, built: &BuildOutput) -> CandidateOutput {
        let mut candidates: Vec<TrackCandidate> = built
            .per_seed
            .iter()
            .flat_map(|s| self.best_of_seed(hits, s))
            .collect();

        let mut n_dropped = 0;
        if self.config.use_hits_splitting {
            flag_shared(&mut candidates);
        } else {
            n_dropped = self.resolve_shared(hits, &mut candidates);
        }

        tracing::debug!(
            candidates = candidates.len(),
            dropped = n_dropped,
            "candidates selected"
        );
        CandidateOutput {
            candidates,
            n_dropped,
        }
    }

    fn best_of_seed(&self, hits: &HitCollection, seed: &SeedTrajectories) -> Vec<TrackCandidate> {
        let tree = &seed.tree;
        let mut leaves = seed.accepted.clone();
        leaves.sort_by(|a, b| {
            let (na, nb) = (tree.get(*a), tree.get(*b));
            nb.n_valid
                .cmp(&na.n_valid)
                .then(nb.score.total_cmp(&na.score))
                .then(a.cmp(b))
        });
        leaves.truncate(self.config.max_candidates_per_seed);

        leaves
            .into_iter()
            .map(|leaf| {
                let node = tree.get(leaf);
                let valid = tree.valid_hits(leaf);
                let (params, region, rebuilt) = if self.config.do_seeding_region_rebuilding {
                    let params = rebuild_params(hits, &valid).unwrap_or(node.params);
                    (params, RegionOfValidity::spanning(hits, &valid), true)
                } else {
                    (node.params, RegionOfValidity::spanning(hits, &tree.seed_hits), false)
                };
                TrackCandidate {
                    seed: seed.seed,
                    leaf,
                    hits: valid,
                    lost_layers: tree.inner_lost_layers(leaf),
                    score: node.score,
                    params,
                    region,
                    hits_split: false,
                    seeding_region_rebuilt: rebuilt,
                }
            })
            .collect()
    }

    /// Visit candidates best first; strip hits already claimed. A stripped
    /// survivor gets its region (and rebuilt parameters) from what is left.
    fn resolve_shared(&self, hits: &HitCollection, candidates: &mut Vec<TrackCandidate>) -> usize {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb) = (&candidates[a], &candidates[b]);
            cb.hits
                .len()
                .cmp(&ca.hits.len())
                .then(cb.score.total_cmp(&ca.score))
                .then(a.cmp(&b))
        });

        let mut claimed: BTreeSet<HitId> = BTreeSet::new();
        let mut keep = vec![true; candidates.len()];
        for i in order {
            let c = &mut candidates[i];
            let n_before = c.hits.len();
            c.hits.retain(|h| !claimed.contains(h));
            if c.hits.len() < self.min_hits {
                keep[i] = false;
                continue;
            }
            claimed.extend(c.hits.iter().copied());
            if c.hits.len() < n_before {
                refresh_after_strip(hits, c);
            }
        }

        let before = candidates.len();
        let mut k = keep.iter();
        candidates.retain(|_| k.next().copied().unwrap_or(false));
        before - candidates.len()
    }
}

fn refresh_after_strip(hits: &HitCollection, c: &mut TrackCandidate) {
    if c.seeding_region_rebuilt {
        c.params = rebuild_params(hits, &c.hits).unwrap_or(c.params);
        c.region = RegionOfValidity::spanning(hits, &c.hits);
        return;
    }
    // seed span: the surviving hits inside the old region
    let old = c.region;
    let inside: Vec<HitId> = c
        .hits
        .iter()
        .copied()
        .filter(|&h| {
            let r = hits.get(h).radius();
            r >= old.r_min - 1e-6 && r <= old.r_max + 1e-6
        })
        .collect();
    let span = if inside.is_empty() { &c.hits } else { &inside };
    c.region = RegionOfValidity::spanning(hits, span);
}

fn flag_shared(candidates: &mut [TrackCandidate]) {
    let mut owners: BTreeMap<HitId, usize> = BTreeMap::new();
    for c in candidates.iter() {
        for h in &c.hits {
            *owners.entry(*h).or_default() += 1;
        }
    }
    for c in candidates.iter_mut() {
        c.hits_split = c.hits.iter().any(|h| owners.get(h).copied().unwrap_or(0) > 1);
    }
}

/// Helix through the first hit, the outermost hit measuring z and one in between.
fn rebuild_params(hits: &HitCollection, ids: &[HitId]) -> Option<HelixParams> {
    let last = ids.iter().rposition(|&h| hits.get(h).is_3d)?;
    if last < 2 {
        return None;
    }
    let p1 = hits.get(ids[0]).position;
    let p2 = hits.get(ids[last / 2]).position;
    let p3 = hits.get(ids[last]).position;
    HelixParams::from_three_points(&p1, &p2, &p3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{BuildStats, CandidateTree},
        local_hits::{LocalHitBuilder, LocalHitConfig},
        testing::helix_clusters,
        types::EventClusters,
    };
    use approx::assert_abs_diff_eq;
    use detector_models::DetectorLayout;

    fn truth() -> HelixParams {
        HelixParams {
            curvature: -0.002,
            phi0: 2.0,
            d0: 0.0,
            z0: 0.3,
            cot_theta: 0.1,
        }
    }

    fn hits() -> HitCollection {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: helix_clusters(&truth(), &layout, &[11, 12, 13, 14], 10),
        };
        LocalHitBuilder::new(&layout, LocalHitConfig::default()).build(&pool)
    }

    /// Two seeds, each with a single accepted root holding `hits`.
    fn built(per_seed: &[&[u32]]) -> BuildOutput {
        let per_seed = per_seed
            .iter()
            .enumerate()
            .map(|(i, ids)| {
                let hit_ids: Vec<HitId> = ids.iter().map(|&h| HitId(h)).collect();
                let mut tree = CandidateTree::new(hit_ids, truth(), 10.2);
                tree.accept_root_for_test();
                SeedTrajectories {
                    seed: SeedId(i as u32),
                    accepted: tree.accepted(),
                    tree,
                    budget_exhausted: false,
                    pruned: 0,
                    cleaned: 0,
                }
            })
            .collect();
        BuildOutput {
            per_seed,
            stats: BuildStats::default(),
        }
    }

    #[test]
    fn splitting_keeps_shared_hits_and_flags_them() {
        let hits = hits();
        let out = CandidateManager::new(CandidateManagerConfig::default(), 3)
            .select(&hits, &built(&[&[0, 1, 2, 3, 4], &[0, 1, 2]]));
        assert_eq!(out.candidates.len(), 2);
        assert!(out.candidates.iter().all(|c| c.hits_split));
        assert_eq!(out.n_dropped, 0);
    }

    #[test]
    fn without_splitting_claimed_hits_are_removed() {
        let hits = hits();
        let config = CandidateManagerConfig {
            use_hits_splitting: false,
            ..Default::default()
        };
        let out = CandidateManager::new(config, 3)
            .select(&hits, &built(&[&[0, 1, 2, 3], &[0, 1, 2, 4]]));
        // first keeps everything, second is left with one hit
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.n_dropped, 1);
        assert!(!out.candidates[0].hits_split);
    }

    #[test]
    fn stripped_candidate_region_shrinks_to_remaining_hits() {
        let hits = hits();
        for rebuild in [true, false] {
            let config = CandidateManagerConfig {
                use_hits_splitting: false,
                do_seeding_region_rebuilding: rebuild,
                ..Default::default()
            };
            // equal length and score: the first claims hit 4 from the second
            let out = CandidateManager::new(config, 2)
                .select(&hits, &built(&[&[0, 1, 4], &[2, 3, 4]]));
            assert_eq!(out.candidates.len(), 2);
            assert_eq!(out.n_dropped, 0);

            let c = &out.candidates[1];
            assert_eq!(c.hits, vec![HitId(2), HitId(3)]);
            assert_abs_diff_eq!(c.region.r_min, hits.get(HitId(2)).radius(), epsilon = 1e-9);
            assert_abs_diff_eq!(c.region.r_max, hits.get(HitId(3)).radius(), epsilon = 1e-9);
            assert!(c.region.r_max < hits.get(HitId(4)).radius());

            let untouched = &out.candidates[0];
            assert_abs_diff_eq!(
                untouched.region.r_max,
                hits.get(HitId(4)).radius(),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn rebuilding_uses_full_span() {
        let hits = hits();
        let out = CandidateManager::new(CandidateManagerConfig::default(), 3)
            .select(&hits, &built(&[&[0, 1, 2, 3, 4]]));
        let c = &out.candidates[0];
        assert!(c.seeding_region_rebuilt);
        assert!(c.region.r_max > 30.0);
        assert_abs_diff_eq!(c.params.curvature, truth().curvature, epsilon = 1e-6);

        let config = CandidateManagerConfig {
            do_seeding_region_rebuilding: false,
            ..Default::default()
        };
        let out = CandidateManager::new(config, 3).select(&hits, &built(&[&[0, 1, 2, 3, 4]]));
        assert!(!out.candidates[0].seeding_region_rebuilt);
    }

    #[test]
    fn empty_build_gives_no_candidates() {
        let out = CandidateManager::new(CandidateManagerConfig::default(), 3)
            .select(&HitCollection::default(), &BuildOutput::default());
        assert!(out.candidates.is_empty());
    }
}
