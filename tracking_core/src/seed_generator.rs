//! Region-constrained triplet seeding.
//!
//! # Algorithm
//! 1. Cluster check: if the residual pool exceeds the configured pixel or
//!    strip cluster counts, seeding is skipped for the event.
//! 2. For every hit on the innermost layer of the set (in parallel), walk
//!    outwards one layer at a time keeping hits inside a Δφ window (bounded
//!    by the region's maximum curvature) and a z window (straight lines from
//!    the luminous segment through the previous hit).
//! 3. Complete combinations get a helix estimate from their first, middle
//!    and last hits; the estimate must lie inside the tracking region.
//! 4. The cluster-shape filter checks every pixel hit against the estimated
//!    inclination.
//!
//! Seeds sharing hits are all kept; the builder and merger deal with them.

use crate::{
    error::ConfigError,
    local_hits::{DetectorHit, HitCollection},
    region::{RegionConfig, TrackingRegion},
    seeding_layers::{SeedingLayerCatalog, SeedingLayerSet, SEC_LAYER_TRIPLETS},
    types::{BeamSpot, EventClusters, HitId, SeedId},
};
use detector_models::{wrap_angle, ClusterShapeModel, DetectorLayout, HelixParams, Technology};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Event-level guard against pathological occupancy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterCheckConfig {
    pub enabled: bool,
    pub max_pixel_clusters: usize,
    pub max_strip_clusters: usize,
}

impl Default for ClusterCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pixel_clusters: 40_000,
            max_strip_clusters: 400_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedGeneratorConfig {
    /// Name of the seeding layer set in the catalog
    pub layer_set: String,
    pub region: RegionConfig,
    pub cluster_check: ClusterCheckConfig,
    /// `None` disables the cluster-shape comparator
    pub shape_filter: Option<ClusterShapeModel>,
    /// Extra Δφ slack between consecutive hits (rad)
    pub phi_tolerance: f64,
    /// Extra z slack between consecutive hits (cm)
    pub z_tolerance: f64,
}

impl Default for SeedGeneratorConfig {
    fn default() -> Self {
        Self {
            layer_set: SEC_LAYER_TRIPLETS.to_string(),
            region: RegionConfig::default(),
            cluster_check: ClusterCheckConfig::default(),
            shape_filter: Some(ClusterShapeModel::default()),
            phi_tolerance: 0.01,
            z_tolerance: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Ordered hits, one per layer of the set, plus the helix estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct Seed {
    pub id: SeedId,
    pub hits: Vec<HitId>,
    pub params: HelixParams,
}

#[derive(Clone, Debug)]
pub struct SeedingOutput {
    pub seeds: Vec<Seed>,
    pub region: TrackingRegion,
    /// Complete combinations whose helix fell outside the region
    pub rejected_region: usize,
    /// Combinations rejected by the cluster-shape comparator
    pub rejected_shape: usize,
    pub skipped_by_cluster_check: bool,
}

#[derive(Default)]
struct Partial {
    seeds: Vec<(Vec<HitId>, HelixParams)>,
    rejected_region: usize,
    rejected_shape: usize,
}

impl Partial {
    fn merge(mut self, other: Partial) -> Partial {
        self.seeds.extend(other.seeds);
        self.rejected_region += other.rejected_region;
        self.rejected_shape += other.rejected_shape;
        self
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SeedGenerator {
    pub config: SeedGeneratorConfig,
    pub layer_set: SeedingLayerSet,
}

struct Walk<'a> {
    hits: &'a HitCollection,
    layout: &'a DetectorLayout,
    region: &'a TrackingRegion,
    per_layer: Vec<&'a [HitId]>,
}

impl SeedGenerator {
    pub fn new(config: SeedGeneratorConfig, catalog: &SeedingLayerCatalog) -> Result<Self, ConfigError> {
        let r = &config.region;
        if !(r.pt_min > 0.0) {
            return Err(ConfigError::invalid("region.pt_min", format!("{} must be > 0", r.pt_min)));
        }
        if !(r.n_sigma_z > 0.0) {
            return Err(ConfigError::invalid("region.n_sigma_z", format!("{} must be > 0", r.n_sigma_z)));
        }
        if !(r.origin_radius > 0.0) {
            return Err(ConfigError::invalid(
                "region.origin_radius",
                format!("{} must be > 0", r.origin_radius),
            ));
        }
        let layer_set = catalog.get(&config.layer_set)?.clone();
        Ok(Self { config, layer_set })
    }

    pub fn generate(
        &self,
        layout: &DetectorLayout,
        hits: &HitCollection,
        pool: &EventClusters,
        beam_spot: &BeamSpot,
    ) -> SeedingOutput {
        let region = TrackingRegion::from_beam_spot(&self.config.region, beam_spot, layout);
        let mut out = SeedingOutput {
            seeds: Vec::new(),
            region,
            rejected_region: 0,
            rejected_shape: 0,
            skipped_by_cluster_check: false,
        };

        let check = &self.config.cluster_check;
        if check.enabled
            && (pool.pixel.len() > check.max_pixel_clusters
                || pool.strip.len() > check.max_strip_clusters)
        {
            tracing::warn!(
                pixel = pool.pixel.len(),
                strip = pool.strip.len(),
                "cluster check failed, seeding skipped"
            );
            out.skipped_by_cluster_check = true;
            return out;
        }

        let walk = Walk {
            hits,
            layout,
            region: &out.region,
            per_layer: self.layer_set.layers.iter().map(|l| hits.on_layer(*l)).collect(),
        };
        if walk.per_layer.iter().any(|h| h.is_empty()) {
            return out;
        }

        let partial = walk.per_layer[0]
            .par_iter()
            .map(|&first| {
                let mut acc = Partial::default();
                let mut path = vec![first];
                self.extend(&walk, &mut path, &mut acc);
                acc
            })
            .collect::<Vec<_>>()
            .into_iter()
            .fold(Partial::default(), Partial::merge);

        out.seeds = partial
            .seeds
            .into_iter()
            .enumerate()
            .map(|(i, (hits, params))| Seed {
                id: SeedId(i as u32),
                hits,
                params,
            })
            .collect();
        out.rejected_region = partial.rejected_region;
        out.rejected_shape = partial.rejected_shape;

        tracing::debug!(
            set = %self.layer_set.name,
            seeds = out.seeds.len(),
            rejected_region = out.rejected_region,
            rejected_shape = out.rejected_shape,
            "seeding done"
        );
        out
    }

    fn extend(&self, walk: &Walk<'_>, path: &mut Vec<HitId>, acc: &mut Partial) {
        let depth = path.len();
        if depth == walk.per_layer.len() {
            self.finish(walk, path, acc);
            return;
        }
        let inner = walk.hits.get(path[depth - 1]);
        for &candidate in walk.per_layer[depth] {
            if self.pair_compatible(walk, inner, walk.hits.get(candidate)) {
                path.push(candidate);
                self.extend(walk, path, acc);
                path.pop();
            }
        }
    }

    fn pair_compatible(&self, walk: &Walk<'_>, inner: &DetectorHit, outer: &DetectorHit) -> bool {
        let r1 = inner.radius();
        let r2 = outer.radius();
        let half_turn = |r: f64| (0.5 * r * walk.region.max_curvature).min(1.0).asin();
        let dphi_max = (half_turn(r2) - half_turn(r1)).abs()
            + walk.region.origin_radius * (1.0 / r1.max(1e-6) - 1.0 / r2.max(1e-6)).abs()
            + self.config.phi_tolerance;
        if wrap_angle(outer.phi() - inner.phi()).abs() > dphi_max {
            return false;
        }

        let (lo, hi) = walk.region.z_window_at(&inner.position, r2);
        let slack = self.config.z_tolerance + 3.0 * (outer.sigma_z + inner.sigma_z * r2 / r1.max(1e-6));
        outer.position.z >= lo - slack && outer.position.z <= hi + slack
    }

    fn finish(&self, walk: &Walk<'_>, path: &[HitId], acc: &mut Partial) {
        let n = path.len();
        let p1 = walk.hits.get(path[0]).position;
        let p2 = walk.hits.get(path[n / 2]).position;
        let p3 = walk.hits.get(path[n - 1]).position;
        let Some(params) = HelixParams::from_three_points(&p1, &p2, &p3) else {
            acc.rejected_region += 1;
            return;
        };
        if !walk.region.accepts(&params) {
            acc.rejected_region += 1;
            return;
        }
        if let Some(model) = &self.config.shape_filter {
            let compatible = path.iter().all(|&id| {
                let hit = walk.hits.get(id);
                hit.technology != Technology::Pixel
                    || walk
                        .layout
                        .layer(hit.layer)
                        .map_or(true, |layer| model.is_compatible(layer, hit.shape, params.cot_theta))
            });
            if !compatible {
                acc.rejected_shape += 1;
                return;
            }
        }
        acc.seeds.push((path.to_vec(), params));
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
        seeding_layers::standard_layer_sets,
        testing::{cluster_at, helix_clusters},
    };
    use approx::assert_abs_diff_eq;
    use detector_models::ClusterShape;

    fn generator(config: SeedGeneratorConfig) -> SeedGenerator {
        let layout = DetectorLayout::standard();
        let catalog = SeedingLayerCatalog::from_configs(&layout, &standard_layer_sets())
            .unwrap_or_default();
        match SeedGenerator::new(config, &catalog) {
            Ok(g) => g,
            Err(e) => panic!("valid config rejected: {e}"),
        }
    }

    fn truth() -> HelixParams {
        HelixParams {
            curvature: -0.008,
            phi0: 1.1,
            d0: 0.01,
            z0: 1.5,
            cot_theta: 0.6,
        }
    }

    fn run(gen: &SeedGenerator, pool: &EventClusters) -> SeedingOutput {
        let layout = DetectorLayout::standard();
        let hits = LocalHitBuilder::new(&layout, LocalHitConfig::default()).build(pool);
        gen.generate(&layout, &hits, pool, &BeamSpot::default())
    }

    #[test]
    fn single_track_gives_one_seed() {
        let layout = DetectorLayout::standard();
        let mut pixel = helix_clusters(&truth(), &layout, &[1, 2, 3], 0);
        // opposite side of the detector
        pixel.push(cluster_at(99, 2, Technology::Pixel, 7.3, -2.0, 0.0));
        let pool = EventClusters { pixel, strip: vec![] };

        let out = run(&generator(SeedGeneratorConfig::default()), &pool);
        assert_eq!(out.seeds.len(), 1);
        let p = out.seeds[0].params;
        assert_abs_diff_eq!(p.curvature, truth().curvature, epsilon = 1e-6);
        assert_abs_diff_eq!(p.z0, truth().z0, epsilon = 1e-6);
        assert_eq!(out.seeds[0].hits.len(), 3);
    }

    #[test]
    fn triplets_sharing_an_inner_pair_are_all_kept() {
        let layout = DetectorLayout::standard();
        let mut pixel = helix_clusters(&truth(), &layout, &[1, 2, 3], 0);
        // a second BPix3 hit a few hundred µm away, compatible with the same pair
        let twin = HelixParams {
            curvature: -0.0085,
            z0: 1.55,
            ..truth()
        };
        pixel.extend(helix_clusters(&twin, &layout, &[3], 50));
        let pool = EventClusters { pixel, strip: vec![] };

        let out = run(&generator(SeedGeneratorConfig::default()), &pool);
        assert_eq!(out.seeds.len(), 2);
        let (a, b) = (&out.seeds[0], &out.seeds[1]);
        assert_eq!(a.hits[..2], b.hits[..2]);
        assert_ne!(a.hits[2], b.hits[2]);
        assert_ne!(a.id, b.id);
        assert_eq!(out.rejected_region + out.rejected_shape, 0);
    }

    #[test]
    fn incompatible_shape_is_rejected() {
        let layout = DetectorLayout::standard();
        let mut pixel = helix_clusters(&truth(), &layout, &[1, 2, 3], 0);
        pixel[1].shape = ClusterShape { size_rphi: 2, size_z: 25 };
        let pool = EventClusters { pixel, strip: vec![] };

        let out = run(&generator(SeedGeneratorConfig::default()), &pool);
        assert!(out.seeds.is_empty());
        assert_eq!(out.rejected_shape, 1);

        let no_filter = SeedGeneratorConfig {
            shape_filter: None,
            ..Default::default()
        };
        assert_eq!(run(&generator(no_filter), &pool).seeds.len(), 1);
    }

    #[test]
    fn displaced_track_is_outside_region() {
        let layout = DetectorLayout::standard();
        let displaced = HelixParams { d0: 1.5, ..truth() };
        let pool = EventClusters {
            pixel: helix_clusters(&displaced, &layout, &[1, 2, 3], 0),
            strip: vec![],
        };
        let out = run(
            &generator(SeedGeneratorConfig {
                phi_tolerance: 0.5,
                ..Default::default()
            }),
            &pool,
        );
        assert!(out.seeds.is_empty());
        assert_eq!(out.rejected_region, 1);
    }

    #[test]
    fn empty_pool_and_cluster_check() {
        let gen = generator(SeedGeneratorConfig::default());
        let out = run(&gen, &EventClusters::default());
        assert!(out.seeds.is_empty());
        assert!(!out.skipped_by_cluster_check);

        let layout = DetectorLayout::standard();
        let pool = EventClusters {
            pixel: helix_clusters(&truth(), &layout, &[1, 2, 3], 0),
            strip: vec![],
        };
        let mut config = SeedGeneratorConfig::default();
        config.cluster_check.max_pixel_clusters = 2;
        let out = run(&generator(config), &pool);
        assert!(out.skipped_by_cluster_check);
        assert!(out.seeds.is_empty());
    }

    #[test]
    fn bad_configuration_is_reported() {
        let catalog = SeedingLayerCatalog::default();
        let config = SeedGeneratorConfig {
            layer_set: "PixelPairs".into(),
            ..Default::default()
        };
        assert_eq!(
            SeedGenerator::new(config, &catalog).err(),
            Some(ConfigError::UnknownLayerSet("PixelPairs".into()))
        );

        let mut config = SeedGeneratorConfig::default();
        config.region.pt_min = 0.0;
        assert!(matches!(
            SeedGenerator::new(config, &catalog),
            Err(ConfigError::InvalidParameter { name: "region.pt_min", .. })
        ));
    }
}
