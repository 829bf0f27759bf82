//! Combinatorial trajectory builder.
//!
//! Every seed owns an arena ([`CandidateTree`]) of trajectory candidates
//! linked by integer ids. Building walks the barrel layers outside the
//! seed's outermost layer in increasing radius; at each layer every growing
//! candidate
//! - spawns one child per compatible hit (prediction χ² below `max_hit_chi2`),
//!   refitted on all its valid hits,
//! - spawns a lost-hit child when no hit is compatible, or always when
//!   `always_use_invalid_hits` is set,
//! - is skipped when the helix misses the layer's active length, and
//!   finalised when the helix curls before reaching it.
//!
//! # State machine
//! `Growing` → `Extended` (has children) | `TerminalAccepted` |
//! `TerminalRejected(reason)`. A growing candidate left without growing
//! children is finalised: accepted if it has at least
//! `minimum_number_of_hits` valid hits, at least one of them beyond the seed,
//! and at most `max_lost_hits` lost ones. A seed with no compatible hit on
//! the first layer it reaches is rejected there with a single lost hit.
//!
//! After each layer: optional intermediate cleaning, then pruning to
//! `max_cand` (lowest score first, ties by arena id), then the per-seed node
//! budget check.

use crate::{
    error::ConfigError,
    fitter::{fit_helix, HitMeasurement},
    local_hits::HitCollection,
    seed_generator::Seed,
    types::{HitId, SeedId},
};
use detector_models::{wrap_angle, DetectorLayer, DetectorLayout, HelixParams, LayerId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Stopping conditions of a trajectory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrajectoryFilterConfig {
    pub minimum_number_of_hits: usize,
    pub max_lost_hits: usize,
    pub max_consecutive_lost_hits: usize,
    /// GeV
    pub min_pt: f64,
}

impl Default for TrajectoryFilterConfig {
    fn default() -> Self {
        Self {
            minimum_number_of_hits: 3,
            max_lost_hits: 1,
            max_consecutive_lost_hits: 1,
            min_pt: 0.075,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrajectoryBuilderConfig {
    pub filter: TrajectoryFilterConfig,
    /// Growing candidates kept per seed after each layer
    pub max_cand: usize,
    /// Score subtracted for every lost hit
    pub lost_hit_penalty: f64,
    /// Hit-prediction χ² above which a hit is incompatible
    pub max_hit_chi2: f64,
    /// Floor of the prediction uncertainty in r-φ (cm)
    pub rphi_tolerance: f64,
    /// Floor of the prediction uncertainty in z (cm)
    pub z_tolerance: f64,
    /// Prediction uncertainty growth per cm of extrapolation at 1 GeV (cm·GeV/cm)
    pub ms_coefficient: f64,
    pub intermediate_cleaning: bool,
    /// Valid-hit overlap at which growing candidates collapse
    pub intermediate_cleaning_fraction: f64,
    pub always_use_invalid_hits: bool,
    /// Arena size at which a seed's building stops
    pub max_nodes_per_seed: usize,
    /// Gauss-Newton iterations of the per-hit refit
    pub refit_iterations: usize,
}

impl Default for TrajectoryBuilderConfig {
    fn default() -> Self {
        Self {
            filter: TrajectoryFilterConfig::default(),
            max_cand: 5,
            lost_hit_penalty: 30.0,
            max_hit_chi2: 30.0,
            rphi_tolerance: 0.05,
            z_tolerance: 0.1,
            ms_coefficient: 0.002,
            intermediate_cleaning: true,
            intermediate_cleaning_fraction: 0.9,
            always_use_invalid_hits: true,
            max_nodes_per_seed: 2000,
            refit_iterations: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(pub u32);

/// What a node added to its parent's path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeHit {
    /// Root: the seed hits
    Seed,
    Valid(HitId),
    Lost(LayerId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    LostHitBudget,
    BelowMinPt,
    CannotReachMinimum,
    TooFewHits,
    FitFailed,
    Pruned,
    Cleaned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateStatus {
    Growing,
    /// Interior node: its path continues in its children
    Extended,
    TerminalAccepted,
    TerminalRejected(RejectReason),
}

#[derive(Clone, Debug)]
pub struct TrajectoryCandidate {
    pub id: CandidateId,
    pub parent: Option<CandidateId>,
    pub children: Vec<CandidateId>,
    pub hit: NodeHit,
    /// Radius of the last layer visited (cm)
    pub radius: f64,
    pub n_valid: usize,
    pub n_lost: usize,
    pub n_consecutive_lost: usize,
    /// Higher is better
    pub score: f64,
    /// Prediction χ² of this node's hit (0 for root and lost nodes)
    pub hit_chi2: f64,
    pub params: HelixParams,
    pub status: CandidateStatus,
}

/// Candidate tree of one seed.
#[derive(Clone, Debug)]
pub struct CandidateTree {
    pub seed_hits: Vec<HitId>,
    nodes: Vec<TrajectoryCandidate>,
}

impl CandidateTree {
    pub fn new(seed_hits: Vec<HitId>, params: HelixParams, radius: f64) -> Self {
        let n_valid = seed_hits.len();
        let root = TrajectoryCandidate {
            id: CandidateId(0),
            parent: None,
            children: Vec::new(),
            hit: NodeHit::Seed,
            radius,
            n_valid,
            n_lost: 0,
            n_consecutive_lost: 0,
            score: 0.0,
            hit_chi2: 0.0,
            params,
            status: CandidateStatus::Growing,
        };
        Self {
            seed_hits,
            nodes: vec![root],
        }
    }

    pub const ROOT: CandidateId = CandidateId(0);

    pub fn get(&self, id: CandidateId) -> &TrajectoryCandidate {
        &self.nodes[id.0 as usize]
    }

    fn get_mut(&mut self, id: CandidateId) -> &mut TrajectoryCandidate {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TrajectoryCandidate> {
        self.nodes.iter()
    }

    fn push_child(&mut self, mut node: TrajectoryCandidate) -> CandidateId {
        let id = CandidateId(self.nodes.len() as u32);
        node.id = id;
        if let Some(parent) = node.parent {
            self.get_mut(parent).children.push(id);
        }
        self.nodes.push(node);
        id
    }

    /// Node ids from the root to `id`.
    pub fn path(&self, id: CandidateId) -> Vec<CandidateId> {
        let mut path = vec![id];
        let mut cur = self.get(id).parent;
        while let Some(p) = cur {
            path.push(p);
            cur = self.get(p).parent;
        }
        path.reverse();
        path
    }

    /// Seed hits followed by the valid hits along the path, inside out.
    pub fn valid_hits(&self, id: CandidateId) -> Vec<HitId> {
        let mut hits = self.seed_hits.clone();
        hits.extend(self.path(id).into_iter().filter_map(|n| match self.get(n).hit {
            NodeHit::Valid(h) => Some(h),
            _ => None,
        }));
        hits
    }

    /// Layers with a lost hit before the last valid hit. Trailing lost hits
    /// are dropped: the track simply ended.
    pub fn inner_lost_layers(&self, id: CandidateId) -> Vec<LayerId> {
        let path = self.path(id);
        let last_valid = path
            .iter()
            .rposition(|&n| matches!(self.get(n).hit, NodeHit::Valid(_) | NodeHit::Seed))
            .unwrap_or(0);
        path[..last_valid]
            .iter()
            .filter_map(|&n| match self.get(n).hit {
                NodeHit::Lost(layer) => Some(layer),
                _ => None,
            })
            .collect()
    }

    /// Terminal-accepted leaves, in id order.
    pub fn accepted(&self) -> Vec<CandidateId> {
        self.nodes
            .iter()
            .filter(|n| n.status == CandidateStatus::TerminalAccepted)
            .map(|n| n.id)
            .collect()
    }
}

#[cfg(test)]
impl CandidateTree {
    pub(crate) fn accept_root_for_test(&mut self) {
        self.nodes[0].status = CandidateStatus::TerminalAccepted;
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SeedTrajectories {
    pub seed: SeedId,
    pub tree: CandidateTree,
    pub accepted: Vec<CandidateId>,
    pub budget_exhausted: bool,
    pub pruned: usize,
    pub cleaned: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildStats {
    pub seeds: usize,
    pub nodes: usize,
    pub accepted: usize,
    pub pruned: usize,
    pub cleaned: usize,
    /// Seeds whose arena hit `max_nodes_per_seed`
    pub budget_exhausted: usize,
}

#[derive(Clone, Debug, Default)]
pub struct BuildOutput {
    pub per_seed: Vec<SeedTrajectories>,
    pub stats: BuildStats,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

enum Extension {
    /// Helix misses the layer's active length
    Skipped,
    /// Helix turns back before the layer
    Curled,
    Children(Vec<CandidateId>),
}

#[derive(Clone, Debug)]
pub struct TrajectoryBuilder {
    pub config: TrajectoryBuilderConfig,
}

impl TrajectoryBuilder {
    pub fn new(config: TrajectoryBuilderConfig) -> Result<Self, ConfigError> {
        let f = &config.filter;
        if f.minimum_number_of_hits < 3 {
            return Err(ConfigError::invalid(
                "builder.filter.minimum_number_of_hits",
                format!("{} is below 3", f.minimum_number_of_hits),
            ));
        }
        if !(f.min_pt >= 0.0) {
            return Err(ConfigError::invalid("builder.filter.min_pt", format!("{}", f.min_pt)));
        }
        if config.max_cand == 0 {
            return Err(ConfigError::invalid("builder.max_cand", "must be at least 1"));
        }
        if !(config.lost_hit_penalty >= 0.0) {
            return Err(ConfigError::invalid(
                "builder.lost_hit_penalty",
                format!("{} is negative", config.lost_hit_penalty),
            ));
        }
        if !(config.max_hit_chi2 > 0.0) {
            return Err(ConfigError::invalid("builder.max_hit_chi2", "must be > 0"));
        }
        let frac = config.intermediate_cleaning_fraction;
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(ConfigError::invalid(
                "builder.intermediate_cleaning_fraction",
                format!("{frac} is outside (0, 1]"),
            ));
        }
        if config.max_nodes_per_seed < 2 {
            return Err(ConfigError::invalid("builder.max_nodes_per_seed", "must be at least 2"));
        }
        Ok(Self { config })
    }

    /// Build trajectories for every seed, in parallel. Output follows seed order.
    pub fn build(&self, layout: &DetectorLayout, hits: &HitCollection, seeds: &[Seed]) -> BuildOutput {
        let per_seed: Vec<SeedTrajectories> = seeds
            .par_iter()
            .map(|seed| self.build_seed(layout, hits, seed))
            .collect();

        let mut stats = BuildStats {
            seeds: seeds.len(),
            ..Default::default()
        };
        for s in &per_seed {
            stats.nodes += s.tree.len();
            stats.accepted += s.accepted.len();
            stats.pruned += s.pruned;
            stats.cleaned += s.cleaned;
            stats.budget_exhausted += usize::from(s.budget_exhausted);
        }
        if stats.budget_exhausted > 0 {
            tracing::warn!(
                seeds = stats.budget_exhausted,
                max_nodes = self.config.max_nodes_per_seed,
                "candidate node budget exhausted"
            );
        }
        tracing::debug!(
            seeds = stats.seeds,
            nodes = stats.nodes,
            accepted = stats.accepted,
            pruned = stats.pruned,
            cleaned = stats.cleaned,
            "trajectory building done"
        );
        BuildOutput { per_seed, stats }
    }

    fn build_seed(&self, layout: &DetectorLayout, hits: &HitCollection, seed: &Seed) -> SeedTrajectories {
        let outer_radius = seed
            .hits
            .iter()
            .filter_map(|&h| layout.layer(hits.get(h).layer))
            .map(|l| l.radius)
            .fold(0.0, f64::max);
        let mut tree = CandidateTree::new(seed.hits.clone(), seed.params, outer_radius);
        let (mut pruned, mut cleaned) = (0, 0);
        let mut budget_exhausted = false;

        let layers = layout.layers_outside(outer_radius);
        let mut growing = vec![CandidateTree::ROOT];

        for (k, layer) in layers.iter().enumerate() {
            if growing.is_empty() {
                break;
            }
            let remaining = layers.len() - k - 1;
            let mut next = Vec::new();
            for &cand in &growing {
                match self.extend(layout, hits, &mut tree, cand, layer, remaining) {
                    Extension::Skipped => next.push(cand),
                    Extension::Curled => self.finalise(&mut tree, cand),
                    Extension::Children(children) => {
                        let alive: Vec<_> = children
                            .into_iter()
                            .filter(|&c| tree.get(c).status == CandidateStatus::Growing)
                            .collect();
                        if alive.is_empty() {
                            self.finalise(&mut tree, cand);
                        } else {
                            tree.get_mut(cand).status = CandidateStatus::Extended;
                            next.extend(alive);
                        }
                    }
                }
            }
            if self.config.intermediate_cleaning {
                cleaned += self.clean(&mut tree, &mut next);
            }
            pruned += self.prune(&mut tree, &mut next);
            growing = next;

            if tree.len() >= self.config.max_nodes_per_seed && !growing.is_empty() {
                budget_exhausted = true;
                break;
            }
        }
        // out of layers (or budget): whatever still grows ends here
        for cand in growing {
            self.finalise(&mut tree, cand);
        }

        SeedTrajectories {
            seed: seed.id,
            accepted: tree.accepted(),
            tree,
            budget_exhausted,
            pruned,
            cleaned,
        }
    }

    fn extend(
        &self,
        layout: &DetectorLayout,
        hits: &HitCollection,
        tree: &mut CandidateTree,
        cand: CandidateId,
        layer: &DetectorLayer,
        remaining: usize,
    ) -> Extension {
        let node = tree.get(cand).clone();
        let Some(cross) = node.params.intersect_radius(layer.radius) else {
            return Extension::Curled;
        };
        if cross.position.z.abs() > layer.half_length {
            return Extension::Skipped;
        }
        let cfg = &self.config;
        let filter = &cfg.filter;

        let pt = layout.pt_for_curvature(node.params.curvature).max(1e-3);
        let ms = cfg.ms_coefficient * (layer.radius - node.radius).max(0.0) / pt;
        let sigma_rphi = cfg.rphi_tolerance + ms;
        let sigma_z = cfg.z_tolerance + ms * (1.0 + node.params.cot_theta.powi(2)).sqrt();
        let pred_phi = cross.position.y.atan2(cross.position.x);

        let mut compatible: Vec<(f64, HitId)> = hits
            .on_layer(layer.id)
            .iter()
            .filter_map(|&id| {
                let hit = hits.get(id);
                let drphi = layer.radius * wrap_angle(hit.phi() - pred_phi);
                let dz = hit.position.z - cross.position.z;
                let chi2 = drphi.powi(2) / (hit.sigma_rphi.powi(2) + sigma_rphi.powi(2))
                    + dz.powi(2) / (hit.sigma_z.powi(2) + sigma_z.powi(2));
                (chi2 < cfg.max_hit_chi2).then_some((chi2, id))
            })
            .collect();
        compatible.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut children = Vec::new();

        for &(chi2, hit_id) in &compatible {
            let mut valid = tree.valid_hits(cand);
            valid.push(hit_id);
            let meas: Vec<HitMeasurement> = valid.iter().map(|&h| hits.get(h).into()).collect();
            let refit = fit_helix(&meas, node.params, cfg.refit_iterations, 1e-6);

            let mut child = TrajectoryCandidate {
                parent: Some(cand),
                hit: NodeHit::Valid(hit_id),
                radius: layer.radius,
                n_valid: node.n_valid + 1,
                n_consecutive_lost: 0,
                score: node.score - chi2,
                hit_chi2: chi2,
                children: Vec::new(),
                ..node.clone()
            };
            child.status = match refit {
                None => CandidateStatus::TerminalRejected(RejectReason::FitFailed),
                Some(fit) => {
                    child.params = fit.params;
                    if layout.pt_for_curvature(fit.params.curvature) < filter.min_pt {
                        CandidateStatus::TerminalRejected(RejectReason::BelowMinPt)
                    } else if child.n_valid + remaining < filter.minimum_number_of_hits {
                        CandidateStatus::TerminalRejected(RejectReason::CannotReachMinimum)
                    } else {
                        CandidateStatus::Growing
                    }
                }
            };
            children.push(tree.push_child(child));
        }

        if compatible.is_empty() || cfg.always_use_invalid_hits {
            let mut lost = TrajectoryCandidate {
                parent: Some(cand),
                hit: NodeHit::Lost(layer.id),
                radius: layer.radius,
                n_lost: node.n_lost + 1,
                n_consecutive_lost: node.n_consecutive_lost + 1,
                score: node.score - cfg.lost_hit_penalty,
                hit_chi2: 0.0,
                children: Vec::new(),
                ..node.clone()
            };
            lost.status = if lost.n_lost > filter.max_lost_hits
                || lost.n_consecutive_lost > filter.max_consecutive_lost_hits
            {
                CandidateStatus::TerminalRejected(RejectReason::LostHitBudget)
            } else if node.hit == NodeHit::Seed && compatible.is_empty() {
                // nothing beyond the seed on the first reachable layer
                CandidateStatus::TerminalRejected(RejectReason::TooFewHits)
            } else if lost.n_valid + remaining < filter.minimum_number_of_hits {
                CandidateStatus::TerminalRejected(RejectReason::CannotReachMinimum)
            } else {
                CandidateStatus::Growing
            };
            children.push(tree.push_child(lost));
        }
        Extension::Children(children)
    }

    fn finalise(&self, tree: &mut CandidateTree, cand: CandidateId) {
        let f = &self.config.filter;
        let n_seed = tree.seed_hits.len();
        let node = tree.get_mut(cand);
        node.status = if node.n_valid >= f.minimum_number_of_hits
            && node.n_valid > n_seed
            && node.n_lost <= f.max_lost_hits
        {
            CandidateStatus::TerminalAccepted
        } else {
            CandidateStatus::TerminalRejected(RejectReason::TooFewHits)
        };
    }

    /// Collapse growing candidates whose valid hits overlap by at least the
    /// cleaning fraction onto the best-scoring one. Returns the number removed.
    fn clean(&self, tree: &mut CandidateTree, growing: &mut Vec<CandidateId>) -> usize {
        let sets: Vec<BTreeSet<HitId>> = growing
            .iter()
            .map(|&c| tree.valid_hits(c).into_iter().collect())
            .collect();
        let mut alive = vec![true; growing.len()];
        for i in 0..growing.len() {
            for j in (i + 1)..growing.len() {
                if !alive[i] || !alive[j] {
                    continue;
                }
                let shared = sets[i].intersection(&sets[j]).count();
                let denom = sets[i].len().min(sets[j].len()).max(1);
                if (shared as f64) / (denom as f64) < self.config.intermediate_cleaning_fraction {
                    continue;
                }
                let (a, b) = (tree.get(growing[i]), tree.get(growing[j]));
                // growing is in id order, so on equal scores i wins
                let loser = if b.score > a.score { i } else { j };
                alive[loser] = false;
            }
        }
        let mut removed = 0;
        let mut kept = Vec::with_capacity(growing.len());
        for (c, keep) in growing.iter().zip(&alive) {
            if *keep {
                kept.push(*c);
            } else {
                tree.get_mut(*c).status = CandidateStatus::TerminalRejected(RejectReason::Cleaned);
                removed += 1;
            }
        }
        *growing = kept;
        removed
    }

    /// Keep the `max_cand` best-scoring growing candidates.
    fn prune(&self, tree: &mut CandidateTree, growing: &mut Vec<CandidateId>) -> usize {
        if growing.len() <= self.config.max_cand {
            return 0;
        }
        growing.sort_by(|a, b| {
            tree.get(*b)
                .score
                .total_cmp(&tree.get(*a).score)
                .then(a.cmp(b))
        });
        let dropped = growing.split_off(self.config.max_cand);
        for c in &dropped {
            tree.get_mut(*c).status = CandidateStatus::TerminalRejected(RejectReason::Pruned);
        }
        growing.sort();
        dropped.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        local_hits::{LocalHitBuilder, LocalHitConfig},
        testing::{cluster_at, helix_clusters},
        types::EventClusters,
    };
    use detector_models::Technology;

    fn truth() -> HelixParams {
        HelixParams {
            curvature: 0.003,
            phi0: 0.5,
            d0: 0.002,
            z0: -0.7,
            cot_theta: 0.35,
        }
    }

    fn setup(pool: &EventClusters) -> (DetectorLayout, HitCollection, Seed) {
        let layout = DetectorLayout::standard();
        let hits = LocalHitBuilder::new(&layout, LocalHitConfig::default()).build(pool);
        let seed_hits: Vec<HitId> = (0..3).map(HitId).collect();
        let p: Vec<_> = seed_hits.iter().map(|&h| hits.get(h).position).collect();
        let params = HelixParams::from_three_points(&p[0], &p[1], &p[2]).unwrap_or_default();
        let seed = Seed {
            id: SeedId(0),
            hits: seed_hits,
            params,
        };
        (layout, hits, seed)
    }

    fn builder(config: TrajectoryBuilderConfig) -> TrajectoryBuilder {
        match TrajectoryBuilder::new(config) {
            Ok(b) => b,
            Err(e) => panic!("valid config rejected: {e}"),
        }
    }

    #[test]
    fn clean_track_is_followed_to_the_last_layer() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: helix_clusters(&truth(), &layout, &[11, 12, 13, 14, 15, 16], 10),
        };
        let (layout, hits, seed) = setup(&pool);
        let out = builder(TrajectoryBuilderConfig::default()).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        assert_eq!(traj.accepted.len(), 1);
        let leaf = traj.tree.get(traj.accepted[0]);
        assert_eq!(leaf.n_valid, 7);
        assert_eq!(leaf.n_lost, 0);
        assert_eq!(traj.tree.valid_hits(leaf.id).len(), 7);
        assert!(traj.cleaned > 0, "lost branches next to valid hits are cleaned");
        assert!(!traj.budget_exhausted);
    }

    #[test]
    fn missing_first_layer_rejects_with_one_lost_hit() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: vec![],
        };
        let (layout, hits, seed) = setup(&pool);
        let out = builder(TrajectoryBuilderConfig::default()).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        assert!(traj.accepted.is_empty());
        let root = traj.tree.get(CandidateTree::ROOT);
        assert_eq!(root.children.len(), 1);
        let node = traj.tree.get(root.children[0]);
        assert_eq!(node.hit, NodeHit::Lost(LayerId(11)));
        assert_eq!(node.n_lost, 1);
        assert!(node.children.is_empty(), "no second lost hit is spent");
        assert_eq!(
            node.status,
            CandidateStatus::TerminalRejected(RejectReason::TooFewHits)
        );
        assert_eq!(traj.tree.len(), 2);
    }

    #[test]
    fn seed_curling_before_the_strips_is_not_accepted() {
        let layout = DetectorLayout::standard();
        // 2R = 20 cm: reaches BPix3 but never TIB1
        let curler = HelixParams {
            curvature: 0.1,
            phi0: 0.5,
            d0: 0.0,
            z0: 0.2,
            cot_theta: 0.35,
        };
        let pool = EventClusters {
            pixel: helix_clusters(&curler, &layout, &[1, 2, 3], 0),
            strip: vec![],
        };
        let (layout, hits, seed) = setup(&pool);
        let out = builder(TrajectoryBuilderConfig::default()).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        assert!(traj.accepted.is_empty());
        let root = traj.tree.get(CandidateTree::ROOT);
        assert!(root.children.is_empty());
        assert_eq!(root.n_valid, 3);
        assert_eq!(
            root.status,
            CandidateStatus::TerminalRejected(RejectReason::TooFewHits)
        );
    }

    #[test]
    fn slow_refit_is_rejected_below_min_pt() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: helix_clusters(&truth(), &layout, &[11, 12, 13, 14, 15, 16], 10),
        };
        let (layout, hits, seed) = setup(&pool);
        let mut config = TrajectoryBuilderConfig::default();
        config.filter.min_pt = 1.0e3;
        let out = builder(config).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        assert!(traj.accepted.is_empty());
        let valid: Vec<_> = traj
            .tree
            .nodes()
            .filter(|n| matches!(n.hit, NodeHit::Valid(_)))
            .collect();
        assert!(!valid.is_empty());
        for n in valid {
            assert_eq!(
                n.status,
                CandidateStatus::TerminalRejected(RejectReason::BelowMinPt)
            );
        }
    }

    #[test]
    fn consecutive_lost_hits_exhaust_the_budget() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            // TIB2 and TIB3 both missing
            strip: helix_clusters(&truth(), &layout, &[11, 12, 16], 10),
        };
        let (layout, hits, seed) = setup(&pool);
        let mut config = TrajectoryBuilderConfig::default();
        config.filter.max_lost_hits = 3;
        config.filter.max_consecutive_lost_hits = 1;
        let out = builder(config).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        let Some(second_miss) = traj
            .tree
            .nodes()
            .find(|n| n.hit == NodeHit::Lost(LayerId(15)) && n.n_consecutive_lost == 2)
        else {
            panic!("second consecutive lost hit expected at TIB3");
        };
        assert!(second_miss.n_lost <= 3);
        assert_eq!(
            second_miss.status,
            CandidateStatus::TerminalRejected(RejectReason::LostHitBudget)
        );
        assert!(traj
            .tree
            .nodes()
            .all(|n| n.hit != NodeHit::Lost(LayerId(16))));
    }

    #[test]
    fn compatible_hit_suppresses_lost_branch_when_invalid_hits_are_off() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: helix_clusters(&truth(), &layout, &[11, 12, 13, 14, 15, 16], 10),
        };
        let (layout, hits, seed) = setup(&pool);
        let config = TrajectoryBuilderConfig {
            always_use_invalid_hits: false,
            ..Default::default()
        };
        let out = builder(config).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        let root = traj.tree.get(CandidateTree::ROOT);
        assert_eq!(root.children.len(), 1);
        assert!(matches!(traj.tree.get(root.children[0]).hit, NodeHit::Valid(_)));
        assert!(traj.tree.nodes().all(|n| !matches!(n.hit, NodeHit::Lost(_))));
        assert_eq!(traj.accepted.len(), 1);
        assert_eq!(traj.tree.get(traj.accepted[0]).n_valid, 7);
    }

    #[test]
    fn unconverged_refit_rejects_the_child() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: helix_clusters(&truth(), &layout, &[11, 12, 13, 14, 15, 16], 10),
        };
        let (layout, hits, seed) = setup(&pool);
        // zero refit iterations never converge
        let config = TrajectoryBuilderConfig {
            refit_iterations: 0,
            ..Default::default()
        };
        let out = builder(config).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        assert!(traj.accepted.is_empty());
        let root = traj.tree.get(CandidateTree::ROOT);
        let Some(&first) = root.children.first() else {
            panic!("root has no children");
        };
        assert!(matches!(traj.tree.get(first).hit, NodeHit::Valid(_)));
        assert_eq!(
            traj.tree.get(first).status,
            CandidateStatus::TerminalRejected(RejectReason::FitFailed)
        );
    }

    #[test]
    fn lost_hit_inside_the_track_is_tolerated() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            // TIB2 pair missing
            strip: helix_clusters(&truth(), &layout, &[11, 12, 15, 16], 10),
        };
        let (layout, hits, seed) = setup(&pool);
        let out = builder(TrajectoryBuilderConfig::default()).build(&layout, &hits, &[seed]);

        let traj = &out.per_seed[0];
        assert_eq!(traj.accepted.len(), 1);
        let leaf = traj.accepted[0];
        assert_eq!(traj.tree.get(leaf).n_valid, 6);
        assert_eq!(traj.tree.get(leaf).n_lost, 1);
        assert_eq!(traj.tree.inner_lost_layers(leaf), vec![LayerId(13)]);
    }

    #[test]
    fn fan_out_is_pruned_to_max_cand() {
        let layout = DetectorLayout::standard();
        let mut strip = helix_clusters(&truth(), &layout, &[11, 12, 13, 14, 15, 16], 10);
        let Some(tib3) = strip.iter().find(|c| c.layer == LayerId(15)).cloned() else {
            panic!("helix crosses TIB3");
        };
        // close-by copies on TIB3, all compatible with the prediction
        let phi = tib3.position[1].atan2(tib3.position[0]);
        for k in 0..6 {
            strip.push(cluster_at(
                100 + k,
                15,
                Technology::Strip,
                41.8,
                phi + 1e-4 * (k as f64 + 1.0),
                tib3.position[2],
            ));
        }
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip,
        };
        let (layout, hits, seed) = setup(&pool);
        let config = TrajectoryBuilderConfig {
            max_cand: 3,
            intermediate_cleaning: false,
            ..Default::default()
        };
        let out = builder(config).build(&layout, &hits, &[seed]);
        let traj = &out.per_seed[0];
        assert!(traj.pruned > 0);
        assert!(traj.accepted.len() <= 3);
        assert!(traj
            .tree
            .nodes()
            .any(|n| n.status == CandidateStatus::TerminalRejected(RejectReason::Pruned)));
    }

    #[test]
    fn node_budget_stops_building() {
        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: helix_clusters(&truth(), &layout, &[11, 12, 13, 14, 15, 16], 10),
        };
        let (layout, hits, seed) = setup(&pool);
        let config = TrajectoryBuilderConfig {
            max_nodes_per_seed: 3,
            ..Default::default()
        };
        let out = builder(config).build(&layout, &hits, &[seed]);
        assert_eq!(out.stats.budget_exhausted, 1);
        assert!(out.per_seed[0].tree.len() < 10);
    }

    #[test]
    fn no_seeds_no_work() {
        let layout = DetectorLayout::standard();
        let hits = HitCollection::default();
        let out = builder(TrajectoryBuilderConfig::default()).build(&layout, &hits, &[]);
        assert!(out.per_seed.is_empty());
        assert_eq!(out.stats, BuildStats::default());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = TrajectoryBuilderConfig {
            max_cand: 0,
            ..Default::default()
        };
        assert!(matches!(
            TrajectoryBuilder::new(config),
            Err(ConfigError::InvalidParameter { name: "builder.max_cand", .. })
        ));
    }
}
