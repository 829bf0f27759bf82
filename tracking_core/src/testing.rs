//! Builders for unit-test fixtures.

use crate::{
    fitter::{FittedTrack, Provenance},
    types::{Cluster, ClusterId, HelixCov, HitId, SeedId, TrackId, Vec3},
};
use detector_models::{ClusterShape, DetectorLayout, HelixParams, LayerId, Technology};

const SHAPE: ClusterShape = ClusterShape {
    size_rphi: 2,
    size_z: 2,
};

pub(crate) fn cluster_at(id: u64, layer: u16, technology: Technology, r: f64, phi: f64, z: f64) -> Cluster {
    Cluster {
        id: ClusterId(id),
        layer: LayerId(layer),
        technology,
        position: [r * phi.cos(), r * phi.sin(), z],
        shape: SHAPE,
        charge: 1.0,
    }
}

/// Cluster somewhere on `layer`; position does not matter to the caller.
pub(crate) fn cluster(id: u64, layer: u16, technology: Technology) -> Cluster {
    let r = DetectorLayout::standard()
        .layer(LayerId(layer))
        .map_or(5.0, |l| l.radius);
    cluster_at(id, layer, technology, r, 0.1 * id as f64, 0.0)
}

/// Clusters left by a helix on the given layers, ids counting up from
/// `first_id`. A stereo cluster carries the z of the crossing on its mono
/// partner. Layers the helix does not reach are skipped.
pub(crate) fn helix_clusters(
    params: &HelixParams,
    layout: &DetectorLayout,
    layers: &[u16],
    first_id: u64,
) -> Vec<Cluster> {
    let mut out = Vec::new();
    for (i, &id) in layers.iter().enumerate() {
        let Some(layer) = layout.layer(LayerId(id)) else {
            continue;
        };
        let Some(crossing) = params.intersect_radius(layer.radius) else {
            continue;
        };
        let z_radius = layout
            .layers
            .iter()
            .find(|l| l.stereo_partner == Some(layer.id) && l.radius < layer.radius)
            .map_or(layer.radius, |mono| mono.radius);
        let Some(z_crossing) = params.intersect_radius(z_radius) else {
            continue;
        };
        let p = crossing.position;
        out.push(Cluster {
            id: ClusterId(first_id + i as u64),
            layer: layer.id,
            technology: layer.technology,
            position: [p.x, p.y, z_crossing.position.z],
            shape: SHAPE,
            charge: 1.0,
        });
    }
    out
}

/// A well-measured central 7-layer track made of `clusters`.
pub(crate) fn fitted_track(id: u64, clusters: &[u64], chi2n: f64) -> FittedTrack {
    let params = HelixParams {
        curvature: 0.003,
        phi0: 0.3,
        d0: 0.0,
        z0: 0.5,
        cot_theta: 0.2,
    };
    let covariance = HelixCov::from_diagonal(&nalgebra::Vector5::new(1e-10, 1e-8, 4e-6, 9e-6, 1e-8));
    let ids: Vec<ClusterId> = clusters.iter().map(|&c| ClusterId(c)).collect();
    FittedTrack {
        id: TrackId(id),
        algorithm: "iter2".to_string(),
        seed: SeedId(0),
        params,
        covariance,
        chi2: chi2n * 5.0,
        ndof: 5,
        pt: 3.8,
        hits: (0..ids.len() as u32).map(HitId).collect(),
        positions: vec![Vec3::zeros(); ids.len()],
        hit_chi2: vec![chi2n; ids.len()],
        clusters: ids.clone(),
        primary_clusters: ids,
        layers: [1, 2, 3, 11, 13, 15, 16].into_iter().map(LayerId).collect(),
        n_layers: 7,
        n_3d_layers: 5,
        n_lost_layers: 0,
        provenance: Provenance {
            iteration: "secStep".to_string(),
            removal_generation: 1,
        },
    }
}
