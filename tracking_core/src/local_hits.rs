//! Local hit builder: clusters → reconstructed hits.
//!
//! - **Pixel**: one cluster gives one 3D hit.
//! - **Strip**: a mono cluster is matched with the closest compatible cluster on
//!   its stereo partner layer (Δφ and Δz windows) into one 3D hit. Unmatched
//!   mono clusters become r-φ hits whose z error is the strip length / √12.
//!   Stereo clusters enter only through matching; their z is the one measured
//!   on the mono reference surface of the module pair, so the matched hit
//!   takes x, y from the mono cluster and z from the stereo one.
//!
//! Hit ids are indices into [`HitCollection::hits`]; pixel hits come first,
//! each technology ordered by (layer, cluster id).

use crate::types::{Cluster, ClusterId, EventClusters, HitId, Vec3};
use detector_models::{
    wrap_angle, ClusterShape, DetectorLayer, DetectorLayout, LayerId, StripSide, Technology,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A reconstructed position measurement on one layer.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorHit {
    pub id: HitId,
    /// Source clusters: one, or mono + stereo for matched strip hits
    pub clusters: Vec<ClusterId>,
    pub layer: LayerId,
    pub technology: Technology,
    pub position: Vec3,
    pub sigma_rphi: f64,
    pub sigma_z: f64,
    pub shape: ClusterShape,
    /// True if the hit measures z (pixel or matched strip)
    pub is_3d: bool,
}

impl DetectorHit {
    pub fn radius(&self) -> f64 {
        self.position.xy().norm()
    }

    pub fn phi(&self) -> f64 {
        self.position.y.atan2(self.position.x)
    }

    /// Cluster identifying the hit for overlap tests.
    pub fn primary_cluster(&self) -> ClusterId {
        self.clusters[0]
    }
}

/// Per-technology parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalHitConfig {
    /// Multiplies the layer's intrinsic pixel resolution
    pub pixel_error_scale: f64,
    /// Multiplies the layer's intrinsic strip resolution
    pub strip_error_scale: f64,
    /// Maximum |Δφ| between matched mono and stereo clusters (rad)
    pub matching_window_phi: f64,
    /// Maximum |Δz| between the mono strip centre and the stereo z (cm)
    pub matching_window_z: f64,
}

impl Default for LocalHitConfig {
    fn default() -> Self {
        Self {
            pixel_error_scale: 1.0,
            strip_error_scale: 1.0,
            matching_window_phi: 0.01,
            matching_window_z: 6.0,
        }
    }
}

/// All hits of one iteration.
#[derive(Clone, Debug, Default)]
pub struct HitCollection {
    pub hits: Vec<DetectorHit>,
    n_pixel: usize,
    by_layer: BTreeMap<LayerId, Vec<HitId>>,
    /// Stereo clusters that found no mono partner
    pub unmatched_stereo: usize,
}

impl HitCollection {
    fn from_hits(pixel: Vec<DetectorHit>, strip: Vec<DetectorHit>, unmatched_stereo: usize) -> Self {
        let n_pixel = pixel.len();
        let mut hits: Vec<DetectorHit> = pixel.into_iter().chain(strip).collect();
        let mut by_layer: BTreeMap<LayerId, Vec<HitId>> = BTreeMap::new();
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.id = HitId(i as u32);
            by_layer.entry(hit.layer).or_default().push(hit.id);
        }
        Self {
            hits,
            n_pixel,
            by_layer,
            unmatched_stereo,
        }
    }

    pub fn get(&self, id: HitId) -> &DetectorHit {
        &self.hits[id.0 as usize]
    }

    pub fn pixel(&self) -> &[DetectorHit] {
        &self.hits[..self.n_pixel]
    }

    pub fn strip(&self) -> &[DetectorHit] {
        &self.hits[self.n_pixel..]
    }

    /// Hits on `layer`, in id order.
    pub fn on_layer(&self, layer: LayerId) -> &[HitId] {
        self.by_layer.get(&layer).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub struct LocalHitBuilder<'a> {
    layout: &'a DetectorLayout,
    pub config: LocalHitConfig,
}

impl<'a> LocalHitBuilder<'a> {
    pub fn new(layout: &'a DetectorLayout, config: LocalHitConfig) -> Self {
        Self { layout, config }
    }

    pub fn build(&self, clusters: &EventClusters) -> HitCollection {
        let pixel = self.pixel_hits(&clusters.pixel);
        let (strip, unmatched_stereo) = self.strip_hits(&clusters.strip);
        tracing::debug!(
            pixel = pixel.len(),
            strip = strip.len(),
            unmatched_stereo,
            "local hits built"
        );
        HitCollection::from_hits(pixel, strip, unmatched_stereo)
    }

    fn pixel_hits(&self, clusters: &[Cluster]) -> Vec<DetectorHit> {
        let mut sorted: Vec<&Cluster> = clusters.iter().collect();
        sorted.sort_by_key(|c| (c.layer, c.id));
        sorted
            .into_iter()
            .filter_map(|c| {
                let layer = self.layout.layer(c.layer)?;
                Some(DetectorHit {
                    id: HitId(0),
                    clusters: vec![c.id],
                    layer: c.layer,
                    technology: Technology::Pixel,
                    position: c.position(),
                    sigma_rphi: layer.sigma_rphi * self.config.pixel_error_scale,
                    sigma_z: layer.sigma_z * self.config.pixel_error_scale,
                    shape: c.shape,
                    is_3d: true,
                })
            })
            .collect()
    }

    fn strip_hits(&self, clusters: &[Cluster]) -> (Vec<DetectorHit>, usize) {
        let mut by_layer: BTreeMap<LayerId, Vec<&Cluster>> = BTreeMap::new();
        for c in clusters {
            by_layer.entry(c.layer).or_default().push(c);
        }
        for list in by_layer.values_mut() {
            list.sort_by_key(|c| c.id);
        }

        let mut hits = Vec::new();
        let mut used_stereo: std::collections::BTreeSet<ClusterId> = Default::default();
        let mut n_stereo = 0usize;

        for (layer_id, list) in &by_layer {
            let Some(layer) = self.layout.layer(*layer_id) else {
                continue;
            };
            if layer.side == Some(StripSide::Stereo) {
                n_stereo += list.len();
                continue;
            }
            let partner: &[&Cluster] = layer
                .stereo_partner
                .and_then(|p| by_layer.get(&p))
                .map_or(&[], Vec::as_slice);
            let stereo_layer = layer.stereo_partner.and_then(|p| self.layout.layer(p));

            for mono in list {
                let matched = stereo_layer.and_then(|sl| self.best_match(mono, partner).map(|s| (sl, s)));
                hits.push(self.strip_hit(layer, mono, matched));
                if let Some((_, stereo)) = matched {
                    used_stereo.insert(stereo.id);
                }
            }
        }
        (hits, n_stereo - used_stereo.len())
    }

    fn best_match<'c>(&self, mono: &Cluster, stereo: &[&'c Cluster]) -> Option<&'c Cluster> {
        let mp = mono.position();
        let mono_phi = mp.y.atan2(mp.x);
        stereo
            .iter()
            .filter_map(|s| {
                let sp = s.position();
                let dphi = wrap_angle(sp.y.atan2(sp.x) - mono_phi).abs();
                let dz = (sp.z - mp.z).abs();
                (dphi <= self.config.matching_window_phi && dz <= self.config.matching_window_z)
                    .then_some((dphi, *s))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)))
            .map(|(_, s)| s)
    }

    fn strip_hit(
        &self,
        layer: &DetectorLayer,
        mono: &Cluster,
        matched: Option<(&DetectorLayer, &Cluster)>,
    ) -> DetectorHit {
        let scale = self.config.strip_error_scale;
        let mut position = mono.position();
        let (clusters, sigma_z, is_3d) = match matched {
            Some((stereo_layer, stereo)) => {
                position.z = stereo.position[2];
                (vec![mono.id, stereo.id], stereo_layer.sigma_z * scale, true)
            }
            None => (vec![mono.id], layer.sigma_z * scale, false),
        };
        DetectorHit {
            id: HitId(0),
            clusters,
            layer: layer.id,
            technology: Technology::Strip,
            position,
            sigma_rphi: layer.sigma_rphi * scale,
            sigma_z,
            shape: mono.shape,
            is_3d,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
