use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::geometry::Trajectory;
use crate::traits::VectorField;

/// Jumps in longitude larger than this are treated as wraps through 2π.
const PHI_JUMP: f64 = 5.0;

pub const CHANNEL_COUNT: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineChannels {
    /// Longitude increment from the previous sample, after unwrapping.
    pub dphi: Vec<f64>,
    pub theta: Vec<f64>,
    pub r: Vec<f64>,
    /// Distance from the rotation axis.
    pub cylindrical_radius: Vec<f64>,
    /// Distance from the equatorial plane; both hemispheres look alike.
    pub height: Vec<f64>,
    /// Magnitude of the radial field.
    pub br: Vec<f64>,
    /// Magnitude of the horizontal field.
    pub bh: Vec<f64>,
    pub curvature: Vec<f64>,
}

impl LineChannels {
    pub fn len(&self) -> usize {
        self.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    pub fn channels(&self) -> [&[f64]; CHANNEL_COUNT] {
        [
            self.dphi.as_slice(),
            self.theta.as_slice(),
            self.r.as_slice(),
            self.cylindrical_radius.as_slice(),
            self.height.as_slice(),
            self.br.as_slice(),
            self.bh.as_slice(),
            self.curvature.as_slice(),
        ]
    }

    fn channels_mut(&mut self) -> [&mut Vec<f64>; CHANNEL_COUNT] {
        [
            &mut self.dphi,
            &mut self.theta,
            &mut self.r,
            &mut self.cylindrical_radius,
            &mut self.height,
            &mut self.br,
            &mut self.bh,
            &mut self.curvature,
        ]
    }
}

/// Removes 2π wraps from a longitude sequence and shifts it to start at zero.
pub fn rectify_phis(phis: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(phis.len());
    let mut offset = 0.0;
    for &phi in phis {
        let mut value = phi + offset;
        if let Some(&prev) = out.last() {
            if (value - prev).abs() > PHI_JUMP {
                offset += if value > prev { -TAU } else { TAU };
                value = phi + offset;
            }
        }
        out.push(value);
    }
    if let Some(&first) = out.first() {
        for value in &mut out {
            *value -= first;
        }
    }
    out
}

/// Unwrapped longitude change at every sample; the first sample gets zero.
pub fn phi_increments(phis: &[f64]) -> Vec<f64> {
    let rectified = rectify_phis(phis);
    let mut increments = vec![0.0; rectified.len()];
    for k in 1..rectified.len() {
        increments[k] = rectified[k] - rectified[k - 1];
    }
    increments
}

/// Signed cube root of the discrete curvature along the line.
///
/// The sign follows the radial change of the tangent, so loops bending back
/// toward the surface are negative.
pub fn curvature(line: &Trajectory) -> Vec<f64> {
    let n = line.len();
    if n == 0 {
        return Vec::new();
    }
    let phis = rectify_phis(&line.points.iter().map(|p| p.phi).collect::<Vec<_>>());

    // Physical tangent from forward differences, zero at the last sample.
    let tangents: Vec<[f64; 3]> = (0..n)
        .map(|k| {
            if k + 1 == n {
                return [0.0; 3];
            }
            let (p, q) = (&line.points[k], &line.points[k + 1]);
            [
                q.r - p.r,
                (q.theta - p.theta) * p.r,
                (phis[k + 1] - phis[k]) * p.r * p.theta.sin(),
            ]
        })
        .collect();
    let mut ds: Vec<f64> = tangents
        .iter()
        .map(|t| (t[0] * t[0] + t[1] * t[1] + t[2] * t[2]).sqrt())
        .collect();
    let longest = ds.iter().copied().fold(0.0, f64::max);
    for value in &mut ds {
        if *value == 0.0 {
            *value = longest;
        }
    }

    (0..n)
        .map(|k| {
            if k == 0 {
                return 0.0;
            }
            let (t, prev) = (tangents[k], tangents[k - 1]);
            let d = [t[0] - prev[0], t[1] - prev[1], t[2] - prev[2]];
            let kappa = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt() / (ds[k] * ds[k]);
            let kappa = if kappa.is_nan() { 0.0 } else { kappa };
            kappa.cbrt() * sign(d[0])
        })
        .collect()
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Derives all channels of one line. Field channels are zero where the field
/// cannot be sampled.
pub fn derive_channels<F: VectorField + ?Sized>(line: &Trajectory, field: &F) -> LineChannels {
    let mut channels = LineChannels {
        dphi: phi_increments(&line.points.iter().map(|p| p.phi).collect::<Vec<_>>()),
        curvature: curvature(line),
        ..LineChannels::default()
    };
    for point in &line.points {
        let xyz = point.to_cartesian();
        channels.theta.push(point.theta);
        channels.r.push(point.r);
        channels.cylindrical_radius.push(xyz.x.hypot(xyz.y));
        channels.height.push(xyz.z.abs());
        match field.sample(point) {
            Ok(sample) => {
                channels.br.push(sample.br.abs());
                channels.bh.push(sample.btheta.hypot(sample.bphi));
            }
            Err(_) => {
                channels.br.push(0.0);
                channels.bh.push(0.0);
            }
        }
    }
    channels
}

/// Min-max normalizes every channel over the whole batch. Constant channels
/// become zero.
pub fn normalize_channels(batch: &mut [LineChannels]) {
    let mut ranges = [(f64::INFINITY, f64::NEG_INFINITY); CHANNEL_COUNT];
    for line in batch.iter() {
        for (range, values) in ranges.iter_mut().zip(line.channels()) {
            for &v in values.iter().filter(|v| v.is_finite()) {
                range.0 = range.0.min(v);
                range.1 = range.1.max(v);
            }
        }
    }
    for line in batch.iter_mut() {
        for (&(min, max), values) in ranges.iter().zip(line.channels_mut()) {
            let span = max - min;
            for v in values.iter_mut() {
                *v = if span > 0.0 { (*v - min) / span } else { 0.0 };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SphericalPoint;
    use crate::integrator::tests::UniformField;
    use std::f64::consts::PI;

    #[test]
    fn rectify_unwraps_longitude_jumps() {
        let phis = [6.0, 6.2, 0.1, 0.3, 6.1];
        let rectified = rectify_phis(&phis);
        let expected = [0.0, 0.2, 0.1 + TAU - 6.0, 0.3 + TAU - 6.0, 0.1];
        for (got, want) in rectified.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{got} vs {want}");
        }
        let increments = phi_increments(&phis);
        assert_eq!(increments[0], 0.0);
        assert!((increments[2] - (0.1 + TAU - 6.2)).abs() < 1e-12);
    }

    #[test]
    fn straight_radial_line_has_zero_curvature() {
        let line = Trajectory::new(
            (0..6)
                .map(|i| SphericalPoint::new(1.0, 1.0, 1.0 + 0.125 * i as f64))
                .collect(),
        );
        let kappa = curvature(&line);
        assert_eq!(kappa.len(), 6);
        assert!(kappa[..5].iter().all(|&k| k == 0.0));
    }

    #[test]
    fn bending_back_down_is_negative() {
        let radii = [1.0, 1.1, 1.2, 1.25, 1.25, 1.2];
        let line = Trajectory::new(
            radii
                .iter()
                .enumerate()
                .map(|(i, &r)| SphericalPoint::new(0.1 * i as f64, 0.5 * PI, r))
                .collect(),
        );
        let kappa = curvature(&line);
        assert_eq!(kappa[0], 0.0);
        assert!(kappa[3] < 0.0);
    }

    #[test]
    fn channels_follow_the_line_and_field() {
        let field = UniformField::new(-2.0, 3.0, 4.0);
        let line = Trajectory::new(vec![
            SphericalPoint::new(0.0, 0.5 * PI, 1.5),
            SphericalPoint::new(0.1, 0.25 * PI, 1.5),
            SphericalPoint::new(0.2, 0.25 * PI, 3.0),
        ]);
        let channels = derive_channels(&line, &field);
        assert_eq!(channels.len(), 3);
        assert!(channels.channels().iter().all(|c| c.len() == 3));
        assert!((channels.cylindrical_radius[0] - 1.5).abs() < 1e-12);
        assert!((channels.height[1] - 1.5 * (0.25 * PI).cos()).abs() < 1e-12);
        assert_eq!(channels.br[0], 2.0);
        assert_eq!(channels.bh[0], 5.0);
        assert_eq!(channels.br[2], 0.0);
        assert_eq!(channels.bh[2], 0.0);
    }

    #[test]
    fn normalization_spans_the_whole_batch() {
        let field = UniformField::new(1.0, 0.0, 0.0);
        let a = Trajectory::new(vec![SphericalPoint::new(0.0, 1.0, 1.0); 3]);
        let b = Trajectory::new(vec![SphericalPoint::new(0.0, 1.0, 2.0); 3]);
        let mut batch = vec![derive_channels(&a, &field), derive_channels(&b, &field)];
        normalize_channels(&mut batch);
        assert!(batch[0].r.iter().all(|&v| v == 0.0));
        assert!(batch[1].r.iter().all(|&v| v == 1.0));
        assert!(batch[0].br.iter().all(|&v| v == 0.0));
        assert!(batch[1].theta.iter().all(|&v| v == 0.0));
    }
}
