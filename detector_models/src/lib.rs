//! `detector_models`: Barrel layer table, helix propagation, cluster-shape model.
//!
//! These are the numeric collaborators the reconstruction consumes: where the
//! layers are, where a helix crosses them, and what cluster a crossing leaves.

pub mod helix;
pub mod layout;
pub mod shape;

pub use helix::{wrap_angle, HelixParams, HelixPoint};
pub use layout::{DetectorLayer, DetectorLayout, LayerId, StripSide, Technology};
pub use shape::{ClusterShape, ClusterShapeModel};
