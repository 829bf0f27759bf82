//! Helix track model in a solenoidal field.
//!
//! # Parametrisation (perigee w.r.t. the origin)
//! - `curvature` ρ: signed inverse radius (1/cm), positive = turning left
//! - `phi0`: direction of flight at the point of closest approach
//! - `d0`: signed transverse impact parameter; perigee = d0·n, n = (−sin φ0, cos φ0)
//! - `z0`: z at the point of closest approach
//! - `cot_theta`: dz/ds with s the transverse arc length
//!
//! ## Crossing a cylinder of radius r
//! sin(ψ/2) = (ρ/2)·√((r² − d0²)/(1 + ρ·d0)),  s = ψ/ρ
//! x(s) = P0 + (sin ψ/ρ)·t + ((1 − cos ψ)/ρ)·n
//!
//! The straight-line limit is taken explicitly below |ρ| < 1e-12.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const STRAIGHT: f64 = 1e-12;

/// Wrap an angle into (−π, π].
pub fn wrap_angle(a: f64) -> f64 {
    let w = (a + PI).rem_euclid(2.0 * PI) - PI;
    if w <= -PI {
        w + 2.0 * PI
    } else {
        w
    }
}

/// Five helix parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HelixParams {
    pub curvature: f64,
    pub phi0: f64,
    pub d0: f64,
    pub z0: f64,
    pub cot_theta: f64,
}

/// A point where a helix crosses a cylinder.
#[derive(Clone, Copy, Debug)]
pub struct HelixPoint {
    pub position: Vector3<f64>,
    /// Transverse arc length from the perigee (cm)
    pub arc_length: f64,
    /// Direction of flight in the transverse plane at the crossing
    pub phi: f64,
}

impl HelixParams {
    pub fn to_array(&self) -> [f64; 5] {
        [self.curvature, self.phi0, self.d0, self.z0, self.cot_theta]
    }

    pub fn from_array(p: [f64; 5]) -> Self {
        Self {
            curvature: p[0],
            phi0: wrap_angle(p[1]),
            d0: p[2],
            z0: p[3],
            cot_theta: p[4],
        }
    }

    /// Unit direction at the perigee.
    fn tangent(&self) -> Vector2<f64> {
        Vector2::new(self.phi0.cos(), self.phi0.sin())
    }

    /// Left normal at the perigee.
    fn normal(&self) -> Vector2<f64> {
        Vector2::new(-self.phi0.sin(), self.phi0.cos())
    }

    pub fn eta(&self) -> f64 {
        self.cot_theta.asinh()
    }

    /// Arc length from the perigee to the first crossing of radius `r`, if reachable.
    pub fn arc_length_at_radius(&self, r: f64) -> Option<f64> {
        let rho = self.curvature;
        let d0 = self.d0;
        if r <= d0.abs() {
            return None;
        }
        if rho.abs() < STRAIGHT {
            return Some((r * r - d0 * d0).sqrt());
        }
        let denom = 1.0 + rho * d0;
        if denom <= 0.0 {
            return None;
        }
        let arg = 0.5 * rho * ((r * r - d0 * d0) / denom).sqrt();
        if arg.abs() > 1.0 {
            // the helix turns back before reaching r
            return None;
        }
        Some(2.0 * arg.asin() / rho)
    }

    /// Transverse position after an arc length `s`.
    pub fn position_at(&self, s: f64) -> Vector3<f64> {
        let psi = self.curvature * s;
        let (f1, f2) = if self.curvature.abs() < STRAIGHT {
            (s, 0.0)
        } else {
            (
                psi.sin() / self.curvature,
                2.0 * (0.5 * psi).sin().powi(2) / self.curvature,
            )
        };
        let p0 = self.normal() * self.d0;
        let xy = p0 + self.tangent() * f1 + self.normal() * f2;
        Vector3::new(xy.x, xy.y, self.z0 + s * self.cot_theta)
    }

    /// First crossing with the cylinder of radius `r`.
    pub fn intersect_radius(&self, r: f64) -> Option<HelixPoint> {
        let s = self.arc_length_at_radius(r)?;
        Some(HelixPoint {
            position: self.position_at(s),
            arc_length: s,
            phi: wrap_angle(self.phi0 + self.curvature * s),
        })
    }

    /// Signed transverse impact parameter w.r.t. a reference point.
    pub fn d0_wrt(&self, x: f64, y: f64) -> f64 {
        let p = Vector2::new(x, y);
        if self.curvature.abs() < STRAIGHT {
            return (self.normal() * self.d0 - p).dot(&self.normal());
        }
        let center = self.normal() * (self.d0 + 1.0 / self.curvature);
        self.curvature.signum() * (center - p).norm() - 1.0 / self.curvature
    }

    /// z at the closest approach to a reference point (straight-line step from the perigee).
    pub fn z0_wrt(&self, x: f64, y: f64) -> f64 {
        let p = Vector2::new(x, y);
        let s = (p - self.normal() * self.d0).dot(&self.tangent());
        self.z0 + s * self.cot_theta
    }

    /// Helix through three space points ordered along the flight direction.
    ///
    /// The transverse circle goes exactly through the points; `z0`/`cot_theta`
    /// come from a straight s–z line through the outer two points.
    pub fn from_three_points(
        p1: &Vector3<f64>,
        p2: &Vector3<f64>,
        p3: &Vector3<f64>,
    ) -> Option<Self> {
        let (x1, y1) = (p1.x, p1.y);
        let (x2, y2) = (p2.x, p2.y);
        let (x3, y3) = (p3.x, p3.y);

        // twice the signed triangle area: > 0 for a left turn
        let cross = (x2 - x1) * (y3 - y2) - (y2 - y1) * (x3 - x2);
        let chord = ((x3 - x1).powi(2) + (y3 - y1).powi(2)).sqrt();
        if chord < 1e-9 {
            return None;
        }

        let mut params = if cross.abs() < 1e-12 * chord * chord {
            let phi0 = (y3 - y1).atan2(x3 - x1);
            let n = Vector2::new(-phi0.sin(), phi0.cos());
            Self {
                curvature: 0.0,
                phi0,
                d0: Vector2::new(x1, y1).dot(&n),
                z0: 0.0,
                cot_theta: 0.0,
            }
        } else {
            let d = 2.0 * (x1 * (y2 - y3) + x2 * (y3 - y1) + x3 * (y1 - y2));
            let s1 = x1 * x1 + y1 * y1;
            let s2 = x2 * x2 + y2 * y2;
            let s3 = x3 * x3 + y3 * y3;
            let cx = (s1 * (y2 - y3) + s2 * (y3 - y1) + s3 * (y1 - y2)) / d;
            let cy = (s1 * (x3 - x2) + s2 * (x1 - x3) + s3 * (x2 - x1)) / d;
            let radius = ((x1 - cx).powi(2) + (y1 - cy).powi(2)).sqrt();
            let sign = cross.signum();
            let curvature = sign / radius;
            let center = Vector2::new(cx, cy);
            let dist = center.norm();
            if dist < 1e-12 {
                return None;
            }
            // n points from the perigee towards the centre for a left turn
            let n = center * (sign / dist);
            Self {
                curvature,
                phi0: (-n.x).atan2(n.y),
                d0: sign * dist - 1.0 / curvature,
                z0: 0.0,
                cot_theta: 0.0,
            }
        };

        let sa = params.arc_length_at_radius(p1.xy().norm())?;
        let sb = params.arc_length_at_radius(p3.xy().norm())?;
        if (sb - sa).abs() < 1e-9 {
            return None;
        }
        params.cot_theta = (p3.z - p1.z) / (sb - sa);
        params.z0 = p1.z - sa * params.cot_theta;
        Some(params)
    }
}
