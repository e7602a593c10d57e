use std::f64::consts::TAU;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A position given as longitude `phi`, colatitude `theta` and radius `r`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphericalPoint {
    pub phi: f64,
    pub theta: f64,
    pub r: f64,
}

impl SphericalPoint {
    pub fn new(phi: f64, theta: f64, r: f64) -> Self {
        Self { phi, theta, r }
    }

    pub fn to_cartesian(&self) -> Vector3<f64> {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let (sin_p, cos_p) = self.phi.sin_cos();
        Vector3::new(self.r * sin_t * cos_p, self.r * sin_t * sin_p, self.r * cos_t)
    }

    /// Inverse of [`SphericalPoint::to_cartesian`]; `phi` is returned in `[0, 2π)`.
    pub fn from_cartesian(v: &Vector3<f64>) -> Self {
        let r = v.norm();
        let phi = wrap_phi(v.y.atan2(v.x));
        let theta = if r > 0.0 {
            (v.z / r).clamp(-1.0, 1.0).acos()
        } else {
            0.0
        };
        Self { phi, theta, r }
    }

    pub fn is_finite(&self) -> bool {
        self.phi.is_finite() && self.theta.is_finite() && self.r.is_finite()
    }
}

/// Wraps an angle into `[0, 2π)`.
pub fn wrap_phi(phi: f64) -> f64 {
    let wrapped = phi.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs.
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// An ordered sequence of samples along a field line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Trajectory {
    pub points: Vec<SphericalPoint>,
}

impl Trajectory {
    pub fn new(points: Vec<SphericalPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&SphericalPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&SphericalPoint> {
        self.points.last()
    }

    pub fn cartesian(&self) -> Vec<Vector3<f64>> {
        self.points.iter().map(SphericalPoint::to_cartesian).collect()
    }

    /// Copies the samples in `range` into a new trajectory.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Trajectory {
        Trajectory::new(self.points[range].to_vec())
    }

    /// Prepends a backward trace that starts at this line's first point.
    ///
    /// `backward[0]` must coincide with `self.points[0]`; it is dropped so the
    /// junction point is not duplicated.
    pub fn prepend_backward(&mut self, backward: &Trajectory) {
        if backward.len() <= 1 {
            return;
        }
        let mut points: Vec<SphericalPoint> =
            backward.points.iter().skip(1).rev().copied().collect();
        points.append(&mut self.points);
        self.points = points;
    }

    /// Appends a forward trace that starts at this line's last point.
    pub fn append_forward(&mut self, forward: &Trajectory) {
        self.points.extend(forward.points.iter().skip(1).copied());
    }
}

pub(crate) fn distance_profile(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).norm()).collect()
}
