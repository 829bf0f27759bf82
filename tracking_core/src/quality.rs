//! Multi-tier quality classification.
//!
//! # Tier graph
//! Tiers are declared in order, each with a public name, the quality level it
//! grants, an optional pre-filter tier and a set of cuts. The graph is
//! validated once (unique names, existing pre-filters, no cycles) and
//! resolved into an evaluation order in which every pre-filter precedes the
//! tiers it gates.
//!
//! # Cuts (per tier, n = number of layers with hits)
//! - n ≥ `min_number_layers`, 3D layers ≥ `min_number_3d_layers`,
//!   lost layers ≤ `max_number_lost_layers`
//! - χ²/ndof ≤ `chi2n_par` · n
//! - nominal d0 resolution σ₀ = hypot(res_par[0], res_par[1] / pT),
//!   z resolution σ₀ · cosh η
//! - d0 cut = min((d0_par1[0]·n)^d0_par1[1] · σ₀, (d0_par2[0]·n)^d0_par2[1] · σ(d0)),
//!   dz cut likewise with the z resolutions
//! - with primary vertices: |d0| and |dz| w.r.t. at least one vertex inside
//!   the cuts; otherwise w.r.t. the beam spot, the dz cut widened to
//!   hypot(`n_sigma_z` · σz, dz cut)
//! - |d0| ≤ `max_d0`, |dz| ≤ `max_z0`

use crate::{
    error::ConfigError,
    fitter::FittedTrack,
    types::{BeamSpot, TrackQuality, Vec3},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierCuts {
    pub chi2n_par: f64,
    pub res_par: [f64; 2],
    pub d0_par1: [f64; 2],
    pub dz_par1: [f64; 2],
    pub d0_par2: [f64; 2],
    pub dz_par2: [f64; 2],
    pub min_number_layers: usize,
    pub min_number_3d_layers: usize,
    pub max_number_lost_layers: usize,
    pub max_d0: f64,
    pub max_z0: f64,
    pub n_sigma_z: f64,
}

impl Default for TierCuts {
    fn default() -> Self {
        Self {
            chi2n_par: 1.6,
            res_par: [0.003, 0.001],
            d0_par1: [1.2, 3.0],
            dz_par1: [1.2, 3.0],
            d0_par2: [1.3, 3.0],
            dz_par2: [1.3, 3.0],
            min_number_layers: 0,
            min_number_3d_layers: 0,
            max_number_lost_layers: 999,
            max_d0: 100.0,
            max_z0: 100.0,
            n_sigma_z: 3.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    pub name: String,
    pub quality: TrackQuality,
    #[serde(default)]
    pub pre_filter: Option<String>,
    pub cuts: TierCuts,
}

/// The six tiers of the second step: vertex-compatibility and track-quality
/// chains, each loose → tight → highPurity.
pub fn second_step_tiers() -> Vec<TierDefinition> {
    let tier = |name: &str, quality, pre: Option<&str>, cuts: TierCuts| TierDefinition {
        name: name.to_string(),
        quality,
        pre_filter: pre.map(str::to_string),
        cuts,
    };
    vec![
        tier(
            "secStepVtxLoose",
            TrackQuality::Loose,
            None,
            TierCuts {
                chi2n_par: 1.6,
                d0_par1: [1.2, 3.0],
                dz_par1: [1.2, 3.0],
                d0_par2: [1.3, 3.0],
                dz_par2: [1.3, 3.0],
                min_number_layers: 3,
                ..Default::default()
            },
        ),
        tier(
            "secStepTrkLoose",
            TrackQuality::Loose,
            None,
            TierCuts {
                chi2n_par: 0.7,
                d0_par1: [1.6, 4.0],
                dz_par1: [1.6, 4.0],
                d0_par2: [1.6, 4.0],
                dz_par2: [1.6, 4.0],
                min_number_layers: 3,
                ..Default::default()
            },
        ),
        tier(
            "secStepVtxTight",
            TrackQuality::Tight,
            Some("secStepVtxLoose"),
            TierCuts {
                chi2n_par: 0.7,
                d0_par1: [0.95, 3.0],
                dz_par1: [0.9, 3.0],
                d0_par2: [1.0, 3.0],
                dz_par2: [1.0, 3.0],
                min_number_layers: 3,
                min_number_3d_layers: 3,
                max_number_lost_layers: 1,
                ..Default::default()
            },
        ),
        tier(
            "secStepTrkTight",
            TrackQuality::Tight,
            Some("secStepTrkLoose"),
            TierCuts {
                chi2n_par: 0.5,
                d0_par1: [1.1, 4.0],
                dz_par1: [1.1, 4.0],
                d0_par2: [1.1, 4.0],
                dz_par2: [1.1, 4.0],
                min_number_layers: 5,
                min_number_3d_layers: 3,
                max_number_lost_layers: 1,
                ..Default::default()
            },
        ),
        tier(
            "secStepVtx",
            TrackQuality::HighPurity,
            Some("secStepVtxTight"),
            TierCuts {
                chi2n_par: 0.7,
                d0_par1: [0.85, 3.0],
                dz_par1: [0.8, 3.0],
                d0_par2: [0.9, 3.0],
                dz_par2: [0.9, 3.0],
                min_number_layers: 3,
                min_number_3d_layers: 3,
                max_number_lost_layers: 1,
                ..Default::default()
            },
        ),
        tier(
            "secStepTrk",
            TrackQuality::HighPurity,
            Some("secStepTrkTight"),
            TierCuts {
                chi2n_par: 0.4,
                d0_par1: [1.0, 4.0],
                dz_par1: [1.0, 4.0],
                d0_par2: [1.0, 4.0],
                dz_par2: [1.0, 4.0],
                min_number_layers: 5,
                min_number_3d_layers: 3,
                max_number_lost_layers: 1,
                ..Default::default()
            },
        ),
    ]
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Validated tiers plus their evaluation order.
#[derive(Clone, Debug)]
pub struct TierGraph {
    tiers: Vec<TierDefinition>,
    /// Index of each tier's pre-filter
    pre: Vec<Option<usize>>,
    order: Vec<usize>,
}

impl TierGraph {
    pub fn new(tiers: Vec<TierDefinition>) -> Result<Self, ConfigError> {
        for (i, t) in tiers.iter().enumerate() {
            if tiers[..i].iter().any(|o| o.name == t.name) {
                return Err(ConfigError::DuplicateTier(t.name.clone()));
            }
            if !(t.cuts.chi2n_par > 0.0) {
                return Err(ConfigError::invalid(
                    "tiers.cuts.chi2n_par",
                    format!("tier '{}': {} must be > 0", t.name, t.cuts.chi2n_par),
                ));
            }
            if t.cuts.res_par.iter().any(|r| !(*r >= 0.0)) || !(t.cuts.n_sigma_z >= 0.0) {
                return Err(ConfigError::invalid(
                    "tiers.cuts",
                    format!("tier '{}': resolutions must be non-negative", t.name),
                ));
            }
        }

        let pre = tiers
            .iter()
            .map(|t| match &t.pre_filter {
                None => Ok(None),
                Some(p) => tiers
                    .iter()
                    .position(|o| &o.name == p)
                    .map(Some)
                    .ok_or_else(|| ConfigError::UnknownPreFilter {
                        tier: t.name.clone(),
                        pre_filter: p.clone(),
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Kahn's algorithm; among ready tiers the first declared goes first
        let mut placed = vec![false; tiers.len()];
        let mut order = Vec::with_capacity(tiers.len());
        while order.len() < tiers.len() {
            let ready = (0..tiers.len())
                .find(|&i| !placed[i] && pre[i].map_or(true, |p| placed[p]));
            match ready {
                Some(i) => {
                    placed[i] = true;
                    order.push(i);
                }
                None => {
                    let stuck = (0..tiers.len()).find(|&i| !placed[i]).unwrap_or(0);
                    return Err(ConfigError::TierCycle(tiers[stuck].name.clone()));
                }
            }
        }

        Ok(Self { tiers, pre, order })
    }

    pub fn tiers(&self) -> &[TierDefinition] {
        &self.tiers
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.name == name)
    }

    pub fn pre_filter_of(&self, tier: usize) -> Option<usize> {
        self.pre[tier]
    }

    /// Tier indices, every pre-filter before the tiers it gates.
    pub fn evaluation_order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierOutcome {
    Pass,
    Fail,
    /// Pre-filter not passed; tier not evaluated
    Gated,
}

/// Outcome of every tier for one track, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct TierResults {
    pub outcomes: Vec<TierOutcome>,
}

impl TierResults {
    pub fn passed(&self, tier: usize) -> bool {
        self.outcomes.get(tier) == Some(&TierOutcome::Pass)
    }

    pub fn by_name(&self, graph: &TierGraph, name: &str) -> Option<TierOutcome> {
        graph.index_of(name).and_then(|i| self.outcomes.get(i).copied())
    }

    /// Passed tier with the highest quality; among equals the one evaluated last.
    pub fn highest_passed(&self, graph: &TierGraph) -> Option<usize> {
        let mut best: Option<usize> = None;
        for &i in graph.evaluation_order() {
            if !self.passed(i) {
                continue;
            }
            let better = best.map_or(true, |b| graph.tiers[i].quality >= graph.tiers[b].quality);
            if better {
                best = Some(i);
            }
        }
        best
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct QualityClassifier {
    pub graph: TierGraph,
}

impl QualityClassifier {
    pub fn new(graph: TierGraph) -> Self {
        Self { graph }
    }

    /// Results for every track, in track order.
    pub fn classify(
        &self,
        tracks: &[FittedTrack],
        beam_spot: &BeamSpot,
        vertices: &[Vec3],
    ) -> Vec<TierResults> {
        let results: Vec<TierResults> = tracks
            .par_iter()
            .map(|t| self.classify_track(t, beam_spot, vertices))
            .collect();
        if tracing::enabled!(tracing::Level::DEBUG) {
            for (i, tier) in self.graph.tiers.iter().enumerate() {
                let passed = results.iter().filter(|r| r.passed(i)).count();
                tracing::debug!(tier = %tier.name, passed, "tier evaluated");
            }
        }
        results
    }

    pub fn classify_track(&self, track: &FittedTrack, beam_spot: &BeamSpot, vertices: &[Vec3]) -> TierResults {
        let mut outcomes = vec![TierOutcome::Gated; self.graph.len()];
        for &i in self.graph.evaluation_order() {
            let gated = self.graph.pre[i].is_some_and(|p| outcomes[p] != TierOutcome::Pass);
            outcomes[i] = if gated {
                TierOutcome::Gated
            } else if passes_cuts(&self.graph.tiers[i].cuts, track, beam_spot, vertices) {
                TierOutcome::Pass
            } else {
                TierOutcome::Fail
            };
        }
        TierResults { outcomes }
    }
}

fn passes_cuts(cuts: &TierCuts, track: &FittedTrack, beam_spot: &BeamSpot, vertices: &[Vec3]) -> bool {
    let n = track.n_layers;
    if n < cuts.min_number_layers
        || track.n_3d_layers < cuts.min_number_3d_layers
        || track.n_lost_layers > cuts.max_number_lost_layers
    {
        return false;
    }
    if track.normalized_chi2() > cuts.chi2n_par * n as f64 {
        return false;
    }

    let nf = n as f64;
    let pt = track.pt.max(1e-9);
    let nom_d0 = cuts.res_par[0].hypot(cuts.res_par[1] / pt);
    let nom_dz = nom_d0 * track.params.eta().cosh();
    let d0_cut = ((cuts.d0_par1[0] * nf).powf(cuts.d0_par1[1]) * nom_d0)
        .min((cuts.d0_par2[0] * nf).powf(cuts.d0_par2[1]) * track.d0_error());
    let dz_cut = ((cuts.dz_par1[0] * nf).powf(cuts.dz_par1[1]) * nom_dz)
        .min((cuts.dz_par2[0] * nf).powf(cuts.dz_par2[1]) * track.z0_error());

    let impact = |x: f64, y: f64, z: f64| {
        (
            track.params.d0_wrt(x, y).abs(),
            (track.params.z0_wrt(x, y) - z).abs(),
        )
    };

    let (bs_d0, bs_dz) = impact(beam_spot.x0, beam_spot.y0, beam_spot.z0);
    if bs_d0 > cuts.max_d0 || bs_dz > cuts.max_z0 {
        return false;
    }

    if vertices.is_empty() {
        let dz_window = (cuts.n_sigma_z * beam_spot.sigma_z).hypot(dz_cut);
        bs_d0 < d0_cut && bs_dz < dz_window
    } else {
        vertices.iter().any(|v| {
            let (d0, dz) = impact(v.x, v.y, v.z);
            d0 < d0_cut && dz < dz_cut
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
