use serde::{Deserialize, Serialize};

use crate::error::LoopResult;
use crate::features::LineChannels;
use crate::geometry::SphericalPoint;

/// Field components at a point, expressed in the local spherical basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSample {
    pub br: f64,
    pub btheta: f64,
    pub bphi: f64,
}

impl FieldSample {
    pub fn magnitude(&self) -> f64 {
        (self.br * self.br + self.btheta * self.btheta + self.bphi * self.bphi).sqrt()
    }
}

/// Bounds of the bounded axes of a spherical domain. Longitude is periodic and
/// therefore has no entry here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub theta_min: f64,
    pub theta_max: f64,
    pub r_min: f64,
    pub r_max: f64,
}

/// A vector field that can be sampled along a field line.
pub trait VectorField {
    /// Evaluates the field at `point`.
    /// Returns `LoopError::OutOfDomain` outside the interpolation support.
    fn sample(&self, point: &SphericalPoint) -> LoopResult<FieldSample>;

    /// Returns the θ and r extent of the sampled volume.
    fn domain(&self) -> Domain;
}

impl<F: VectorField + ?Sized> VectorField for &F {
    fn sample(&self, point: &SphericalPoint) -> LoopResult<FieldSample> {
        (**self).sample(point)
    }

    fn domain(&self) -> Domain {
        (**self).domain()
    }
}

/// Scores a whole line; lines scoring above the configured threshold are kept.
pub trait Classifier {
    fn score(&self, channels: &LineChannels) -> f64;
}

/// Assigns one class label to every sample of a line.
pub trait Segmenter {
    /// The returned sequence must have one label per sample.
    fn segment(&self, channels: &LineChannels) -> Vec<usize>;
}
