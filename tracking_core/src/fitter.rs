//! Final track fit.
//!
//! # Model
//! Each hit contributes an r-φ residual, and a z residual if the hit measures
//! z, both normalised by the hit uncertainty:
//!   r_φ = r·wrap(φ_hit − φ_pred) / σ_rφ,   r_z = (z_hit − z_pred) / σ_z
//! where the prediction is the helix crossing of the hit's radius.
//!
//! # Solver
//! Gauss-Newton on the five helix parameters with a central-difference
//! Jacobian. Normal equations A·δ = −Jᵀr are solved by Cholesky; a step that
//! raises χ² is halved up to four times. Covariance = A⁻¹ at the minimum.
//! The fit is deterministic: same hits and start point, same result.

use crate::{
    candidates::TrackCandidate,
    local_hits::{DetectorHit, HitCollection},
    types::{ClusterId, HelixCov, HitId, SeedId, TrackId, Vec3},
};
use detector_models::{wrap_angle, DetectorLayout, HelixParams, LayerId};
use nalgebra::{Cholesky, Vector5};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Finite-difference steps per parameter (ρ, φ0, d0, z0, cot θ).
const DIFF_STEP: [f64; 5] = [1e-7, 1e-7, 1e-6, 1e-6, 1e-7];

// ---------------------------------------------------------------------------
// Fit kernel
// ---------------------------------------------------------------------------

/// One position measurement fed to the fit.
#[derive(Clone, Copy, Debug)]
pub struct HitMeasurement {
    pub position: Vec3,
    pub sigma_rphi: f64,
    pub sigma_z: f64,
    pub use_z: bool,
}

impl From<&DetectorHit> for HitMeasurement {
    fn from(hit: &DetectorHit) -> Self {
        Self {
            position: hit.position,
            sigma_rphi: hit.sigma_rphi,
            sigma_z: hit.sigma_z,
            use_z: hit.is_3d,
        }
    }
}

impl HitMeasurement {
    fn dimension(&self) -> usize {
        if self.use_z {
            2
        } else {
            1
        }
    }
}

#[derive(Clone, Debug)]
pub struct HelixFit {
    pub params: HelixParams,
    pub covariance: HelixCov,
    pub chi2: f64,
    pub ndof: u32,
    /// χ² contribution of each measurement, in input order
    pub hit_chi2: Vec<f64>,
    pub iterations: usize,
}

/// Normalised residuals, two per 3D hit and one per r-φ hit. `None` if the
/// helix does not reach one of the hit radii.
fn residuals(params: &HelixParams, meas: &[HitMeasurement]) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(meas.len() * 2);
    for m in meas {
        let r = m.position.xy().norm();
        let pred = params.intersect_radius(r)?.position;
        let dphi = wrap_angle(m.position.y.atan2(m.position.x) - pred.y.atan2(pred.x));
        out.push(r * dphi / m.sigma_rphi);
        if m.use_z {
            out.push((m.position.z - pred.z) / m.sigma_z);
        }
    }
    Some(out)
}

fn chi2_of(res: &[f64]) -> f64 {
    res.iter().map(|r| r * r).sum()
}

fn shifted(params: &HelixParams, k: usize, delta: f64) -> HelixParams {
    let mut a = params.to_array();
    a[k] += delta;
    HelixParams::from_array(a)
}

/// Jacobian rows (one per residual) by central differences.
fn jacobian(params: &HelixParams, meas: &[HitMeasurement], n_res: usize) -> Option<Vec<Vector5<f64>>> {
    let mut rows = vec![Vector5::zeros(); n_res];
    for (k, h) in DIFF_STEP.iter().enumerate() {
        let plus = residuals(&shifted(params, k, *h), meas)?;
        let minus = residuals(&shifted(params, k, -*h), meas)?;
        for (row, (p, m)) in rows.iter_mut().zip(plus.iter().zip(&minus)) {
            row[k] = (p - m) / (2.0 * h);
        }
    }
    Some(rows)
}

fn normal_equations(rows: &[Vector5<f64>], res: &[f64]) -> (HelixCov, Vector5<f64>) {
    let mut a = HelixCov::zeros();
    let mut b = Vector5::zeros();
    for (g, r) in rows.iter().zip(res) {
        a += g * g.transpose();
        b -= g * *r;
    }
    (a, b)
}

/// Least-squares helix through `meas`, starting from `initial`.
///
/// Returns `None` for under-constrained, singular or non-converging fits.
pub fn fit_helix(
    meas: &[HitMeasurement],
    initial: HelixParams,
    max_iterations: usize,
    tolerance: f64,
) -> Option<HelixFit> {
    let n_res: usize = meas.iter().map(HitMeasurement::dimension).sum();
    if n_res <= 5 {
        return None;
    }

    let mut params = initial;
    let mut res = residuals(&params, meas)?;
    let mut chi2 = chi2_of(&res);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let rows = jacobian(&params, meas, n_res)?;
        let (a, b) = normal_equations(&rows, &res);
        let step = Cholesky::new(a)?.solve(&b);

        let mut scale = 1.0;
        let mut accepted = None;
        for _ in 0..5 {
            let mut trial = params.to_array();
            for (t, s) in trial.iter_mut().zip(step.iter()) {
                *t += scale * s;
            }
            let trial = HelixParams::from_array(trial);
            if let Some(r) = residuals(&trial, meas) {
                let c = chi2_of(&r);
                if c <= chi2 {
                    accepted = Some((trial, r, c));
                    break;
                }
            }
            scale *= 0.5;
        }

        let Some((trial, r, c)) = accepted else {
            // no descent direction left: already at the minimum
            converged = true;
            break;
        };
        let improvement = chi2 - c;
        params = trial;
        res = r;
        chi2 = c;
        if improvement <= tolerance * (1.0 + chi2) {
            converged = true;
            break;
        }
    }
    if !converged {
        return None;
    }

    let rows = jacobian(&params, meas, n_res)?;
    let (a, _) = normal_equations(&rows, &res);
    let covariance = Cholesky::new(a)?.inverse();

    let mut hit_chi2 = Vec::with_capacity(meas.len());
    let mut i = 0;
    for m in meas {
        let d = m.dimension();
        hit_chi2.push(chi2_of(&res[i..i + d]));
        i += d;
    }

    Some(HelixFit {
        params,
        covariance,
        chi2,
        ndof: (n_res - 5) as u32,
        hit_chi2,
        iterations,
    })
}

// ---------------------------------------------------------------------------
// Fitted tracks
// ---------------------------------------------------------------------------

/// Where a track came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Provenance {
    /// Name of the producing iteration
    pub iteration: String,
    /// Generation of the removal record the iteration ran on
    pub removal_generation: u32,
}

#[derive(Clone, Debug)]
pub struct FittedTrack {
    pub id: TrackId,
    /// Algorithm tag, e.g. "iter2"
    pub algorithm: String,
    pub seed: SeedId,
    pub params: HelixParams,
    pub covariance: HelixCov,
    pub chi2: f64,
    pub ndof: u32,
    pub pt: f64,
    /// Hits ordered by radius
    pub hits: Vec<HitId>,
    pub positions: Vec<Vec3>,
    pub hit_chi2: Vec<f64>,
    /// Every cluster consumed, matched-strip stereo clusters included
    pub clusters: Vec<ClusterId>,
    /// One cluster per hit, used for overlap tests
    pub primary_clusters: Vec<ClusterId>,
    pub layers: Vec<LayerId>,
    pub n_layers: usize,
    pub n_3d_layers: usize,
    pub n_lost_layers: usize,
    pub provenance: Provenance,
}

impl FittedTrack {
    pub fn normalized_chi2(&self) -> f64 {
        self.chi2 / f64::from(self.ndof.max(1))
    }

    /// Uncertainty on d0 (cm).
    pub fn d0_error(&self) -> f64 {
        self.covariance[(2, 2)].max(0.0).sqrt()
    }

    /// Uncertainty on z0 (cm).
    pub fn z0_error(&self) -> f64 {
        self.covariance[(3, 3)].max(0.0).sqrt()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitterConfig {
    /// Algorithm tag stamped on every track
    pub algorithm: String,
    pub max_iterations: usize,
    /// Relative χ² improvement below which the fit has converged
    pub tolerance: f64,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            algorithm: "iter2".to_string(),
            max_iterations: 20,
            tolerance: 1e-6,
        }
    }
}

/// Identity of the calling iteration.
#[derive(Clone, Copy, Debug)]
pub struct FitContext<'a> {
    pub iteration_index: usize,
    pub iteration_name: &'a str,
    pub removal_generation: u32,
}

#[derive(Clone, Debug, Default)]
pub struct FitOutput {
    pub tracks: Vec<FittedTrack>,
    pub n_failed: usize,
}

#[derive(Clone, Debug)]
pub struct TrackFitter {
    pub config: FitterConfig,
}

impl TrackFitter {
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }

    pub fn fit_all(
        &self,
        layout: &DetectorLayout,
        hits: &HitCollection,
        candidates: &[TrackCandidate],
        ctx: FitContext<'_>,
    ) -> FitOutput {
        let fits: Vec<Option<FittedTrack>> = candidates
            .par_iter()
            .map(|c| self.fit_candidate(layout, hits, c, &ctx))
            .collect();

        let mut out = FitOutput::default();
        for fit in fits {
            match fit {
                Some(mut track) => {
                    track.id = TrackId::new(ctx.iteration_index, out.tracks.len());
                    out.tracks.push(track);
                }
                None => out.n_failed += 1,
            }
        }
        tracing::debug!(
            fitted = out.tracks.len(),
            failed = out.n_failed,
            "track fit done"
        );
        out
    }

    fn fit_candidate(
        &self,
        layout: &DetectorLayout,
        hits: &HitCollection,
        candidate: &TrackCandidate,
        ctx: &FitContext<'_>,
    ) -> Option<FittedTrack> {
        let detector_hits: Vec<_> = candidate.hits.iter().map(|&id| hits.get(id)).collect();
        let meas: Vec<HitMeasurement> = detector_hits.iter().map(|h| (*h).into()).collect();
        let fit = fit_helix(
            &meas,
            candidate.params,
            self.config.max_iterations,
            self.config.tolerance,
        )?;

        let layers: BTreeSet<LayerId> = detector_hits.iter().map(|h| h.layer).collect();
        let layers_3d: BTreeSet<LayerId> = detector_hits
            .iter()
            .filter(|h| h.is_3d)
            .map(|h| h.layer)
            .collect();

        Some(FittedTrack {
            id: TrackId::default(),
            algorithm: self.config.algorithm.clone(),
            seed: candidate.seed,
            pt: layout.pt_for_curvature(fit.params.curvature),
            params: fit.params,
            covariance: fit.covariance,
            chi2: fit.chi2,
            ndof: fit.ndof,
            hits: candidate.hits.clone(),
            positions: detector_hits.iter().map(|h| h.position).collect(),
            hit_chi2: fit.hit_chi2,
            clusters: detector_hits
                .iter()
                .flat_map(|h| h.clusters.iter().copied())
                .collect(),
            primary_clusters: detector_hits.iter().map(|h| h.primary_cluster()).collect(),
            n_layers: layers.len(),
            n_3d_layers: layers_3d.len(),
            n_lost_layers: candidate.lost_layers.len(),
            layers: layers.into_iter().collect(),
            provenance: Provenance {
                iteration: ctx.iteration_name.to_string(),
                removal_generation: ctx.removal_generation,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn truth() -> HelixParams {
        HelixParams {
            curvature: 0.004,
            phi0: -0.4,
            d0: -0.005,
            z0: 0.8,
            cot_theta: -0.3,
        }
    }

    fn measurements(params: &HelixParams) -> Vec<HitMeasurement> {
        [4.4, 7.3, 10.2, 25.5, 33.9, 41.8]
            .iter()
            .filter_map(|&r| params.intersect_radius(r))
            .enumerate()
            .map(|(i, p)| HitMeasurement {
                position: p.position,
                sigma_rphi: if i < 3 { 0.001 } else { 0.0025 },
                sigma_z: if i < 3 { 0.002 } else { 0.05 },
                use_z: i < 5,
            })
            .collect()
    }

    #[test]
    fn exact_hits_fit_to_truth() {
        let meas = measurements(&truth());
        let start = HelixParams {
            curvature: 0.0045,
            phi0: -0.39,
            z0: 0.7,
            ..truth()
        };
        let Some(fit) = fit_helix(&meas, start, 20, 1e-9) else {
            panic!("fit failed");
        };
        assert_abs_diff_eq!(fit.params.curvature, truth().curvature, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.params.phi0, truth().phi0, epsilon = 1e-5);
        assert_abs_diff_eq!(fit.params.z0, truth().z0, epsilon = 1e-4);
        assert!(fit.chi2 < 1e-3, "chi2 = {}", fit.chi2);
        assert_eq!(fit.ndof, 11 - 5);
        assert_eq!(fit.hit_chi2.len(), 6);
        // covariance is symmetric positive
        assert!(fit.covariance[(2, 2)] > 0.0);
        assert_abs_diff_eq!(fit.covariance[(0, 3)], fit.covariance[(3, 0)], epsilon = 1e-12);
    }

    #[test]
    fn fit_is_deterministic() {
        let meas = measurements(&truth());
        let a = fit_helix(&meas, truth(), 20, 1e-9).map(|f| f.params);
        let b = fit_helix(&meas, truth(), 20, 1e-9).map(|f| f.params);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_measurements_fail() {
        let meas = measurements(&truth());
        assert!(fit_helix(&meas[..2], truth(), 20, 1e-9).is_none());
    }

    #[test]
    fn unreachable_start_fails() {
        let meas = measurements(&truth());
        // R ≈ 5 cm: cannot reach the strip layers
        let start = HelixParams {
            curvature: 0.2,
            ..truth()
        };
        assert!(fit_helix(&meas, start, 20, 1e-9).is_none());
    }
}
