//! Barrel layer table.
//!
//! Lengths are in centimetres, the solenoid field in tesla. Only barrel
//! cylinders are described; a layer is a radius, a half-length, a technology
//! and its intrinsic resolution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversion from curvature radius to transverse momentum: pT [GeV] = 0.003 · B [T] · R [cm].
pub const PT_PER_TESLA_CM: f64 = 0.003;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LayerId(pub u16);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Sensor technology of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Technology {
    Pixel,
    Strip,
}

/// Role of a strip layer in a double-sided module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripSide {
    /// Measures r-φ precisely; z only to the strip length
    Mono,
    /// Tilted strips; combined with the mono side it yields z
    Stereo,
}

/// One barrel layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorLayer {
    pub id: LayerId,
    /// Human readable name, e.g. "BPix1" or "TIB2s"
    pub name: String,
    pub technology: Technology,
    /// Cylinder radius (cm)
    pub radius: f64,
    /// Active half-length along z (cm)
    pub half_length: f64,
    /// Intrinsic r-φ resolution (cm)
    pub sigma_rphi: f64,
    /// Intrinsic z resolution (cm). For mono strips this is the strip length / √12.
    pub sigma_z: f64,
    /// Strip side; `None` for pixel layers
    pub side: Option<StripSide>,
    /// Stereo layer paired with this mono layer
    pub stereo_partner: Option<LayerId>,
    /// Sensor thickness (cm)
    pub thickness: f64,
    /// Readout pitch along z (cm)
    pub pitch_z: f64,
}

impl DetectorLayer {
    /// True for layers the navigation visits (everything except stereo sides,
    /// whose clusters only enter through mono/stereo matching).
    pub fn is_navigable(&self) -> bool {
        self.side != Some(StripSide::Stereo)
    }

    /// True if a hit on this layer carries a real z measurement.
    pub fn is_3d(&self) -> bool {
        self.technology == Technology::Pixel || self.stereo_partner.is_some()
    }
}

/// The barrel layer table plus the solenoid field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorLayout {
    /// Solenoid field (T)
    pub b_field: f64,
    pub layers: Vec<DetectorLayer>,
}

impl Default for DetectorLayout {
    fn default() -> Self {
        Self::standard()
    }
}

impl DetectorLayout {
    /// Three pixel barrel layers followed by four strip layers, the inner two
    /// of which are double sided.
    pub fn standard() -> Self {
        let pixel = |id: u16, name: &str, radius: f64| DetectorLayer {
            id: LayerId(id),
            name: name.to_string(),
            technology: Technology::Pixel,
            radius,
            half_length: 26.5,
            sigma_rphi: 0.0010,
            sigma_z: 0.0020,
            side: None,
            stereo_partner: None,
            thickness: 0.0285,
            pitch_z: 0.0150,
        };
        let strip = |id: u16, name: &str, radius: f64, side: StripSide, partner: Option<u16>| {
            DetectorLayer {
                id: LayerId(id),
                name: name.to_string(),
                technology: Technology::Strip,
                radius,
                half_length: 70.0,
                sigma_rphi: 0.0025,
                sigma_z: match side {
                    StripSide::Stereo => 0.05,
                    StripSide::Mono => 11.9 / 12f64.sqrt(),
                },
                side: Some(side),
                stereo_partner: partner.map(LayerId),
                thickness: 0.0320,
                pitch_z: 11.9,
            }
        };
        Self {
            b_field: 3.8,
            layers: vec![
                pixel(1, "BPix1", 4.4),
                pixel(2, "BPix2", 7.3),
                pixel(3, "BPix3", 10.2),
                strip(11, "TIB1", 25.5, StripSide::Mono, Some(12)),
                strip(12, "TIB1s", 26.0, StripSide::Stereo, None),
                strip(13, "TIB2", 33.9, StripSide::Mono, Some(14)),
                strip(14, "TIB2s", 34.4, StripSide::Stereo, None),
                strip(15, "TIB3", 41.8, StripSide::Mono, None),
                strip(16, "TIB4", 49.8, StripSide::Mono, None),
            ],
        }
    }

    pub fn layer(&self, id: LayerId) -> Option<&DetectorLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&DetectorLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Navigable layers sorted by increasing radius.
    pub fn navigation_layers(&self) -> Vec<&DetectorLayer> {
        let mut layers: Vec<&DetectorLayer> =
            self.layers.iter().filter(|l| l.is_navigable()).collect();
        layers.sort_by(|a, b| a.radius.total_cmp(&b.radius));
        layers
    }

    /// Navigable layers strictly outside `radius`, innermost first.
    pub fn layers_outside(&self, radius: f64) -> Vec<&DetectorLayer> {
        self.navigation_layers()
            .into_iter()
            .filter(|l| l.radius > radius + 1e-6)
            .collect()
    }

    /// Signed-curvature magnitude (1/cm) of a track with transverse momentum `pt` (GeV).
    pub fn curvature_for_pt(&self, pt: f64) -> f64 {
        PT_PER_TESLA_CM * self.b_field / pt
    }

    /// Transverse momentum (GeV) for a curvature (1/cm).
    pub fn pt_for_curvature(&self, curvature: f64) -> f64 {
        if curvature.abs() < f64::EPSILON {
            f64::INFINITY
        } else {
            PT_PER_TESLA_CM * self.b_field / curvature.abs()
        }
    }
}
