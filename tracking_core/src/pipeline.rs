//! Iteration orchestrator: one tracking iteration over one event, and the
//! sequential chain of iterations.
//!
//! # Processing steps per event
//! 1. Hit pool: drop clusters of good prior tracks and everything removed before
//! 2. Local hits from the residual clusters
//! 3. Region-constrained seeding
//! 4. Combinatorial trajectory building (per seed, parallel)
//! 5. Candidate selection (rebuilding, hit splitting)
//! 6. Final fit (per candidate, parallel)
//! 7. Tier classification (per track, parallel)
//! 8. Track list merging
//!
//! An iteration is a pure function of (event, context, configuration). The
//! context carries the previous iteration's merged tracks and removal record.

use crate::{
    builder::{TrajectoryBuilder, TrajectoryBuilderConfig},
    candidates::{CandidateManager, CandidateManagerConfig},
    error::ConfigError,
    fitter::{FitContext, FittedTrack, FitterConfig, TrackFitter},
    hit_pool::{ClusterRemovalRecord, HitPoolConfig, HitPoolManager},
    local_hits::{LocalHitBuilder, LocalHitConfig},
    merger::{MergedTrack, MergedTrackCollection, MergerConfig, TrackListMerger},
    metrics::IterationStats,
    quality::{second_step_tiers, QualityClassifier, TierDefinition, TierGraph, TierResults},
    seed_generator::{SeedGenerator, SeedGeneratorConfig},
    seeding_layers::{standard_layer_sets, SeedingLayerCatalog, SeedingLayerSetConfig},
    types::{Event, TrackQuality},
};
use detector_models::DetectorLayout;
use serde::{Deserialize, Serialize};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Full parameter set of one iteration. Loadable from JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IterationConfig {
    pub name: String,
    /// Minimum quality of the previous iteration's tracks whose clusters are removed
    pub prior_quality: TrackQuality,
    pub hit_pool: HitPoolConfig,
    pub local_hits: LocalHitConfig,
    pub seeding_layers: Vec<SeedingLayerSetConfig>,
    pub seeding: SeedGeneratorConfig,
    pub builder: TrajectoryBuilderConfig,
    pub candidates: CandidateManagerConfig,
    pub fitter: FitterConfig,
    pub tiers: Vec<TierDefinition>,
    pub merger: MergerConfig,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self::second_step()
    }
}

impl IterationConfig {
    /// The second iteration: pixel triplets from a low-pT region, six tiers
    /// and a vertex/track merge with priority quality.
    pub fn second_step() -> Self {
        Self {
            name: "secStep".to_string(),
            prior_quality: TrackQuality::HighPurity,
            hit_pool: HitPoolConfig::default(),
            local_hits: LocalHitConfig::default(),
            seeding_layers: standard_layer_sets(),
            seeding: SeedGeneratorConfig::default(),
            builder: TrajectoryBuilderConfig::default(),
            candidates: CandidateManagerConfig::default(),
            fitter: FitterConfig::default(),
            tiers: second_step_tiers(),
            merger: MergerConfig::default(),
        }
    }

    /// Check every parameter and resolve names into a runnable [`Iteration`].
    pub fn validate(&self, layout: &DetectorLayout) -> Result<Iteration, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.hit_pool.max_chi2.is_nan() || self.hit_pool.max_chi2 < 0.0 {
            return Err(ConfigError::invalid(
                "hit_pool.max_chi2",
                format!("{} is negative", self.hit_pool.max_chi2),
            ));
        }
        let lh = &self.local_hits;
        if lh.matching_window_phi <= 0.0 || lh.matching_window_z <= 0.0 {
            return Err(ConfigError::invalid("local_hits", "matching windows must be > 0"));
        }
        if lh.pixel_error_scale <= 0.0 || lh.strip_error_scale <= 0.0 {
            return Err(ConfigError::invalid("local_hits", "error scales must be > 0"));
        }
        if self.fitter.max_iterations == 0 {
            return Err(ConfigError::invalid("fitter.max_iterations", "must be at least 1"));
        }
        if self.candidates.max_candidates_per_seed == 0 {
            return Err(ConfigError::invalid(
                "candidates.max_candidates_per_seed",
                "must be at least 1",
            ));
        }

        let catalog = SeedingLayerCatalog::from_configs(layout, &self.seeding_layers)?;
        let seeds = SeedGenerator::new(self.seeding.clone(), &catalog)?;
        let builder = TrajectoryBuilder::new(self.builder.clone())?;
        let graph = TierGraph::new(self.tiers.clone())?;
        let merger = TrackListMerger::new(self.merger.clone(), &graph)?;

        Ok(Iteration {
            name: self.name.clone(),
            prior_quality: self.prior_quality,
            hit_pool: HitPoolManager::new(self.hit_pool.clone()),
            local_hits: self.local_hits.clone(),
            seeds,
            candidates: CandidateManager::new(
                self.candidates.clone(),
                self.builder.filter.minimum_number_of_hits,
            ),
            builder,
            fitter: TrackFitter::new(self.fitter.clone()),
            classifier: QualityClassifier::new(graph),
            merger,
        })
    }
}

// ---------------------------------------------------------------------------
// Context and output
// ---------------------------------------------------------------------------

/// What an iteration inherits from the ones before it.
#[derive(Clone, Debug, Default)]
pub struct IterationContext {
    /// Position of the iteration in the chain; stamped into track ids
    pub index: usize,
    /// Merged tracks of the previous iteration
    pub accepted: MergedTrackCollection,
    pub removal: Option<ClusterRemovalRecord>,
}

impl IterationContext {
    /// Context for the iteration following the one that produced `output`.
    pub fn next(&self, output: &IterationOutput) -> Self {
        Self {
            index: self.index + 1,
            accepted: output.merged.clone(),
            removal: Some(output.removal.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IterationOutput {
    pub name: String,
    pub merged: MergedTrackCollection,
    pub removal: ClusterRemovalRecord,
    /// All fitted tracks, before selection
    pub fitted: Vec<FittedTrack>,
    /// Aligned with `fitted`
    pub tier_results: Vec<TierResults>,
    pub stats: IterationStats,
}

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

/// A validated, immutable iteration.
#[derive(Clone, Debug)]
pub struct Iteration {
    pub name: String,
    pub prior_quality: TrackQuality,
    hit_pool: HitPoolManager,
    local_hits: LocalHitConfig,
    seeds: SeedGenerator,
    builder: TrajectoryBuilder,
    candidates: CandidateManager,
    fitter: TrackFitter,
    classifier: QualityClassifier,
    merger: TrackListMerger,
}

fn elapsed_us(t: Instant) -> u64 {
    t.elapsed().as_micros() as u64
}

impl Iteration {
    pub fn tier_graph(&self) -> &TierGraph {
        &self.classifier.graph
    }

    pub fn run(&self, layout: &DetectorLayout, event: &Event, ctx: &IterationContext) -> IterationOutput {
        let start_total = Instant::now();
        let mut stats = IterationStats {
            clusters_in: event.clusters.len(),
            ..Default::default()
        };

        // ----------------------------------------------------------------
        // Step 1: Hit pool
        // ----------------------------------------------------------------
        let t = Instant::now();
        let prior = ctx.accepted.with_quality(self.prior_quality);
        let pool = self
            .hit_pool
            .build(&event.clusters, &prior, ctx.removal.as_ref());
        stats.clusters_removed = pool.n_removed;
        stats.timing_hit_pool_us = elapsed_us(t);

        // ----------------------------------------------------------------
        // Step 2: Local hits
        // ----------------------------------------------------------------
        let t = Instant::now();
        let hits = LocalHitBuilder::new(layout, self.local_hits.clone()).build(&pool.residual);
        stats.hits = hits.len();
        stats.unmatched_stereo = hits.unmatched_stereo;
        stats.timing_local_hits_us = elapsed_us(t);

        // ----------------------------------------------------------------
        // Step 3: Seeding
        // ----------------------------------------------------------------
        let t = Instant::now();
        let seeding = self
            .seeds
            .generate(layout, &hits, &pool.residual, &event.beam_spot);
        stats.seeds = seeding.seeds.len();
        stats.seeds_rejected_region = seeding.rejected_region;
        stats.seeds_rejected_shape = seeding.rejected_shape;
        stats.seeding_skipped = seeding.skipped_by_cluster_check;
        stats.timing_seeding_us = elapsed_us(t);

        // ----------------------------------------------------------------
        // Step 4-5: Trajectory building and candidate selection
        // ----------------------------------------------------------------
        let t = Instant::now();
        let built = self.builder.build(layout, &hits, &seeding.seeds);
        stats.builder_nodes = built.stats.nodes;
        stats.builder_pruned = built.stats.pruned;
        stats.builder_cleaned = built.stats.cleaned;
        stats.builder_budget_exhausted = built.stats.budget_exhausted;
        let candidates = self.candidates.select(&hits, &built);
        stats.candidates = candidates.candidates.len();
        stats.candidates_dropped = candidates.n_dropped;
        stats.timing_building_us = elapsed_us(t);

        // ----------------------------------------------------------------
        // Step 6: Fit
        // ----------------------------------------------------------------
        let t = Instant::now();
        let fit = self.fitter.fit_all(
            layout,
            &hits,
            &candidates.candidates,
            FitContext {
                iteration_index: ctx.index,
                iteration_name: &self.name,
                removal_generation: pool.record.generation,
            },
        );
        stats.fitted = fit.tracks.len();
        stats.fit_failures = fit.n_failed;
        stats.timing_fit_us = elapsed_us(t);

        // ----------------------------------------------------------------
        // Step 7: Classification
        // ----------------------------------------------------------------
        let t = Instant::now();
        let vertices = event.vertex_positions();
        let tier_results = self
            .classifier
            .classify(&fit.tracks, &event.beam_spot, &vertices);
        let graph = &self.classifier.graph;
        stats.tier_passed = graph
            .tiers()
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let n = tier_results.iter().filter(|r| r.passed(i)).count();
                (t.name.clone(), n)
            })
            .collect();
        stats.timing_classify_us = elapsed_us(t);

        // ----------------------------------------------------------------
        // Step 8: Merge
        // ----------------------------------------------------------------
        let t = Instant::now();
        let merged = {
            let lists = self.merger.lists(&fit.tracks, &tier_results, graph);
            self.merger.merge(&lists, graph)
        };
        stats.merged = merged.len();
        stats.duplicates_removed = merged.n_duplicates;
        stats.timing_merge_us = elapsed_us(t);
        stats.total_time_us = elapsed_us(start_total);

        tracing::info!(
            iteration = %self.name,
            event = event.number,
            removed = stats.clusters_removed,
            seeds = stats.seeds,
            candidates = stats.candidates,
            fitted = stats.fitted,
            merged = stats.merged,
            time_us = stats.total_time_us,
            "iteration done"
        );

        IterationOutput {
            name: self.name.clone(),
            merged,
            removal: pool.record,
            fitted: fit.tracks,
            tier_results,
            stats,
        }
    }
}

// ---------------------------------------------------------------------------
// Iteration chain
// ---------------------------------------------------------------------------

/// Output of all iterations on one event.
#[derive(Clone, Debug)]
pub struct TrackerOutput {
    pub iterations: Vec<IterationOutput>,
}

impl TrackerOutput {
    /// Merged tracks of every iteration, in iteration order.
    pub fn tracks(&self) -> impl Iterator<Item = &MergedTrack> {
        self.iterations.iter().flat_map(|o| o.merged.tracks.iter())
    }

    /// Removal record after the last iteration.
    pub fn final_removal(&self) -> Option<&ClusterRemovalRecord> {
        self.iterations.last().map(|o| &o.removal)
    }
}

/// Runs a list of iterations in order, each on what the previous left.
#[derive(Clone, Debug)]
pub struct IterativeTracker {
    pub layout: DetectorLayout,
    pub iterations: Vec<Iteration>,
}

impl IterativeTracker {
    pub fn new(layout: DetectorLayout, configs: &[IterationConfig]) -> Result<Self, ConfigError> {
        let mut iterations: Vec<Iteration> = Vec::with_capacity(configs.len());
        for config in configs {
            if iterations.iter().any(|it| it.name == config.name) {
                return Err(ConfigError::invalid(
                    "iterations",
                    format!("iteration '{}' appears twice", config.name),
                ));
            }
            iterations.push(config.validate(&layout)?);
        }
        Ok(Self { layout, iterations })
    }

    pub fn run(&self, event: &Event) -> TrackerOutput {
        self.run_from(event, IterationContext::default())
    }

    /// Run the chain starting from an existing context (e.g. the output of
    /// iterations run elsewhere).
    pub fn run_from(&self, event: &Event, mut ctx: IterationContext) -> TrackerOutput {
        let mut outputs = Vec::with_capacity(self.iterations.len());
        for iteration in &self.iterations {
            let out = iteration.run(&self.layout, event, &ctx);
            ctx = ctx.next(&out);
            outputs.push(out);
        }
        TrackerOutput {
            iterations: outputs,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::helix_clusters,
        types::EventClusters,
    };
    use detector_models::HelixParams;

    fn layout() -> DetectorLayout {
        DetectorLayout::standard()
    }

    fn iteration(config: &IterationConfig) -> Iteration {
        match config.validate(&layout()) {
            Ok(it) => it,
            Err(e) => panic!("config rejected: {e}"),
        }
    }

    fn tracks() -> Vec<HelixParams> {
        vec![
            HelixParams {
                curvature: 0.003,
                phi0: 0.5,
                d0: 0.002,
                z0: -0.7,
                cot_theta: 0.35,
            },
            HelixParams {
                curvature: -0.006,
                phi0: -2.2,
                d0: -0.001,
                z0: 1.2,
                cot_theta: -0.5,
            },
        ]
    }

    fn event() -> Event {
        let layout = layout();
        let mut clusters = EventClusters::default();
        for (i, p) in tracks().iter().enumerate() {
            let base = 100 * i as u64;
            clusters.pixel.extend(helix_clusters(p, &layout, &[1, 2, 3], base));
            clusters
                .strip
                .extend(helix_clusters(p, &layout, &[11, 12, 13, 14, 15, 16], base + 10));
        }
        Event {
            number: 7,
            clusters,
            ..Default::default()
        }
    }

    #[test]
    fn second_step_validates_and_survives_json() {
        let config = IterationConfig::second_step();
        let json = serde_json::to_string_pretty(&config).unwrap_or_default();
        let back: IterationConfig = match serde_json::from_str(&json) {
            Ok(c) => c,
            Err(e) => panic!("{e}"),
        };
        let it = iteration(&back);
        assert_eq!(it.name, "secStep");
        assert_eq!(it.tier_graph().len(), 6);
    }

    #[test]
    fn configuration_errors_surface_at_validation() {
        let mut config = IterationConfig::second_step();
        config.seeding.layer_set = "PixelLessTriplets".into();
        assert_eq!(
            config.validate(&layout()).err(),
            Some(ConfigError::UnknownLayerSet("PixelLessTriplets".into()))
        );

        let mut config = IterationConfig::second_step();
        config.tiers[2].pre_filter = Some("nope".into());
        assert!(matches!(
            config.validate(&layout()),
            Err(ConfigError::UnknownPreFilter { .. })
        ));

        let mut config = IterationConfig::second_step();
        config.merger.sets_to_merge[0].lists.push(5);
        assert!(matches!(
            config.validate(&layout()),
            Err(ConfigError::UnknownTrackList { list: 5, .. })
        ));
    }

    #[test]
    fn empty_event_gives_empty_output() {
        let it = iteration(&IterationConfig::second_step());
        let out = it.run(&layout(), &Event::default(), &IterationContext::default());
        assert!(out.merged.is_empty());
        assert!(out.fitted.is_empty());
        assert_eq!(out.stats.seeds, 0);
        assert_eq!(out.stats.candidates, 0);
        assert_eq!(out.removal.generation, 1);
    }

    #[test]
    fn clean_tracks_are_found_once_each() {
        let it = iteration(&IterationConfig::second_step());
        let out = it.run(&layout(), &event(), &IterationContext::default());
        assert_eq!(out.merged.len(), 2, "stats: {:?}", out.stats);
        for m in &out.merged.tracks {
            assert_eq!(m.quality, TrackQuality::HighPurity);
            assert_eq!(m.track.algorithm, "iter2");
            assert_eq!(m.track.n_layers, 7);
            assert_eq!(m.track.provenance.iteration, "secStep");
        }
    }

    #[test]
    fn pixel_only_seeds_give_no_tracks() {
        let mut ev = event();
        ev.clusters.strip.clear();
        let it = iteration(&IterationConfig::second_step());
        let out = it.run(&layout(), &ev, &IterationContext::default());
        assert!(out.stats.seeds > 0, "stats: {:?}", out.stats);
        assert_eq!(out.stats.candidates, 0);
        assert!(out.fitted.is_empty());
        assert!(out.merged.is_empty());
    }

    #[test]
    fn runs_are_deterministic() {
        let it = iteration(&IterationConfig::second_step());
        let a = it.run(&layout(), &event(), &IterationContext::default());
        let b = it.run(&layout(), &event(), &IterationContext::default());
        assert_eq!(a.merged.ids(), b.merged.ids());
        assert_eq!(a.tier_results, b.tier_results);
        for (x, y) in a.fitted.iter().zip(&b.fitted) {
            assert_eq!(x.params, y.params);
            assert_eq!(x.hits, y.hits);
        }
    }

    #[test]
    fn chained_iterations_never_reuse_removed_clusters() {
        let mut second = IterationConfig::second_step();
        second.name = "secStepAgain".into();
        let tracker = match IterativeTracker::new(layout(), &[IterationConfig::second_step(), second]) {
            Ok(t) => t,
            Err(e) => panic!("{e}"),
        };
        let ev = event();
        let out = tracker.run(&ev);
        assert_eq!(out.iterations.len(), 2);
        assert_eq!(out.iterations[0].merged.len(), 2);

        let removal = &out.iterations[1].removal;
        assert_eq!(removal.generation, 2);
        // everything the first iteration used is gone, so nothing is left to find
        assert!(out.iterations[1].merged.is_empty());
        for m in &out.iterations[0].merged.tracks {
            assert!(m.track.clusters.iter().all(|c| removal.contains(*c)));
        }
        let left = ev
            .clusters
            .pixel
            .iter()
            .filter(|c| !removal.contains(c.id))
            .count();
        assert_eq!(left, 0, "pixel clusters survived removal");
        assert_eq!(out.tracks().count(), 2);
    }

    #[test]
    fn duplicate_iteration_names_are_rejected() {
        let c = IterationConfig::second_step();
        assert!(IterativeTracker::new(layout(), &[c.clone(), c]).is_err());
    }
}
