use std::f64::consts::{PI, TAU};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geometry::{wrap_phi, SphericalPoint, Trajectory};
use crate::traits::{Domain, FieldSample, VectorField};

/// Sense in which a field line is followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

/// Which way seed lines are traced from their seed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraceOrder {
    #[default]
    Forward,
    Backward,
    /// Half the steps backward, half forward; the seed ends up in the middle.
    Both,
}

/// How the radial boundaries of the domain are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// Leaving the domain freezes the line at its last valid sample.
    Freeze,
    /// The radius is mirrored back into `[r_min, r_max]` after every step.
    Reflect,
}

/// Fixed arclength (Euler) field-line tracer in spherical coordinates.
///
/// Every step follows the unit field direction for a distance `ds`, converting
/// the displacement to coordinate increments with the spherical metric. Lines
/// crossing a pole are continued on the opposite meridian and φ is kept in
/// `[0, 2π)`. Sampling failures never shorten a line: the remaining samples
/// repeat the last valid position.
#[derive(Debug, Clone)]
pub struct StreamlineIntegrator<F> {
    field: F,
    policy: BoundaryPolicy,
    domain: Domain,
}

impl<F: VectorField> StreamlineIntegrator<F> {
    pub fn new(field: F, policy: BoundaryPolicy) -> Self {
        let domain = field.domain();
        Self {
            field,
            policy,
            domain,
        }
    }

    /// Traces `steps` steps covering `total_arclength`; returns `steps + 1` points.
    pub fn integrate(
        &self,
        seed: SphericalPoint,
        total_arclength: f64,
        steps: usize,
        direction: Direction,
    ) -> Trajectory {
        let step = if steps == 0 {
            0.0
        } else {
            total_arclength / steps as f64
        };
        self.trace(seed, step, steps, direction)
    }

    /// Traces `steps` steps of arclength `step`; returns `steps + 1` points.
    pub fn trace(
        &self,
        seed: SphericalPoint,
        step: f64,
        steps: usize,
        direction: Direction,
    ) -> Trajectory {
        let total = steps + 1;
        let mut points = Vec::with_capacity(total);
        points.push(self.fold_seed(seed));
        let ds = step * direction.sign();

        for k in 0..steps {
            let current = points[k];
            let sample = match self.field.sample(&current) {
                Ok(sample) => sample,
                Err(err) => {
                    debug!("Freezing field line after {k} of {steps} steps: {err}");
                    freeze(&mut points, total, true);
                    return Trajectory::new(points);
                }
            };
            match self.advance(&current, &sample, ds) {
                Some(next) => points.push(next),
                None => {
                    debug!(
                        "Freezing field line after {} of {steps} steps: degenerate field",
                        k + 1
                    );
                    freeze(&mut points, total, false);
                    return Trajectory::new(points);
                }
            }
        }

        if steps > 0 {
            let n = points.len();
            if self.field.sample(&points[n - 1]).is_err() {
                points[n - 1] = points[n - 2];
            }
        }
        Trajectory::new(points)
    }

    /// Traces a line of `len` points with the seed at index `len / 2`.
    pub fn trace_centered(&self, seed: SphericalPoint, step: f64, len: usize) -> Trajectory {
        if len == 0 {
            return Trajectory::default();
        }
        let back_steps = len / 2;
        let forward_steps = len - back_steps - 1;
        let backward = self.trace(seed, step, back_steps, Direction::Backward);
        let mut line = self.trace(seed, step, forward_steps, Direction::Forward);
        line.prepend_backward(&backward);
        line
    }

    /// Traces a seed line of `steps + 1` points in the requested order.
    pub fn trace_ordered(
        &self,
        seed: SphericalPoint,
        total_arclength: f64,
        steps: usize,
        order: TraceOrder,
    ) -> Trajectory {
        match order {
            TraceOrder::Forward => self.integrate(seed, total_arclength, steps, Direction::Forward),
            TraceOrder::Backward => {
                self.integrate(seed, total_arclength, steps, Direction::Backward)
            }
            TraceOrder::Both => {
                let step = if steps == 0 {
                    0.0
                } else {
                    total_arclength / steps as f64
                };
                self.trace_centered(seed, step, steps + 1)
            }
        }
    }

    /// Maps a seed that sits past the θ extent of the domain back inside it.
    pub fn fold_seed(&self, seed: SphericalPoint) -> SphericalPoint {
        let mut point = seed;
        if point.theta > self.domain.theta_max {
            point.theta = 2.0 * self.domain.theta_max - point.theta;
            point.phi += PI;
        } else if point.theta < self.domain.theta_min {
            point.theta = 2.0 * self.domain.theta_min - point.theta;
            point.phi += PI;
        }
        point.phi = wrap_phi(point.phi);
        if self.policy == BoundaryPolicy::Reflect {
            point.r = reflect(point.r, self.domain.r_min, self.domain.r_max);
        }
        point
    }

    fn advance(
        &self,
        point: &SphericalPoint,
        sample: &FieldSample,
        ds: f64,
    ) -> Option<SphericalPoint> {
        let magnitude = sample.magnitude();
        if !(magnitude > 0.0 && magnitude.is_finite()) {
            return None;
        }
        let scale = ds / magnitude;
        let mut next = SphericalPoint {
            phi: point.phi + scale * sample.bphi / (point.r * point.theta.sin()).abs(),
            theta: point.theta + scale * sample.btheta / point.r,
            r: point.r + scale * sample.br,
        };
        if !next.is_finite() {
            return None;
        }

        if next.theta > PI {
            next.theta = TAU - next.theta;
            next.phi += PI;
        } else if next.theta < 0.0 {
            next.theta = -next.theta;
            next.phi += PI;
        }
        next.theta = next.theta.clamp(0.0, PI);
        next.phi = wrap_phi(next.phi);
        if self.policy == BoundaryPolicy::Reflect {
            next.r = reflect(next.r, self.domain.r_min, self.domain.r_max);
        }
        Some(next)
    }
}

fn reflect(value: f64, min: f64, max: f64) -> f64 {
    if value > max {
        2.0 * max - value
    } else if value < min {
        2.0 * min - value
    } else {
        value
    }
}

/// Pads `points` to `total` samples with the last valid one. When
/// `drop_current` is set the final sample is the one that failed to evaluate.
fn freeze(points: &mut Vec<SphericalPoint>, total: usize, drop_current: bool) {
    if drop_current && points.len() > 1 {
        points.pop();
    }
    if let Some(&last) = points.last() {
        points.resize(total, last);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{LoopError, LoopResult};

    /// Constant components in the local spherical basis over a box domain.
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct UniformField {
        pub components: FieldSample,
        pub domain: Domain,
    }

    impl UniformField {
        pub(crate) fn new(br: f64, btheta: f64, bphi: f64) -> Self {
            Self {
                components: FieldSample { br, btheta, bphi },
                domain: Domain {
                    theta_min: 0.0,
                    theta_max: PI,
                    r_min: 1.0,
                    r_max: 2.0,
                },
            }
        }
    }

    impl VectorField for UniformField {
        fn sample(&self, point: &SphericalPoint) -> LoopResult<FieldSample> {
            let d = &self.domain;
            let inside = point.theta >= d.theta_min
                && point.theta <= d.theta_max
                && point.r >= d.r_min
                && point.r <= d.r_max;
            if inside {
                Ok(self.components)
            } else {
                Err(LoopError::OutOfDomain {
                    phi: point.phi,
                    theta: point.theta,
                    r: point.r,
                })
            }
        }

        fn domain(&self) -> Domain {
            self.domain
        }
    }

    #[test]
    fn azimuthal_field_traces_a_latitude_circle() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(0.0, 0.0, 1.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(6.0, 0.5 * PI, 1.5);
        let line = integrator.integrate(seed, 1.5, 10, Direction::Forward);
        assert_eq!(line.len(), 11);
        for (k, point) in line.points.iter().enumerate() {
            assert!((point.theta - 0.5 * PI).abs() < 1e-12);
            assert!((point.r - 1.5).abs() < 1e-12);
            let expected = wrap_phi(6.0 + 0.1 * k as f64);
            assert!((point.phi - expected).abs() < 1e-9, "phi at {k}");
            assert!(point.phi >= 0.0 && point.phi < TAU);
        }
    }

    #[test]
    fn leaving_the_domain_freezes_the_line() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(1.0, 0.0, 0.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(1.0, 1.0, 1.5);
        let line = integrator.trace(seed, 0.125, 10, Direction::Forward);
        assert_eq!(line.len(), 11);
        let radii: Vec<f64> = line.points.iter().map(|p| p.r).collect();
        assert_eq!(&radii[..5], &[1.5, 1.625, 1.75, 1.875, 2.0]);
        for point in &line.points[5..] {
            assert_eq!(*point, line.points[4]);
        }
    }

    #[test]
    fn terminal_point_outside_domain_is_replaced() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(1.0, 0.0, 0.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(1.0, 1.0, 1.5);
        let line = integrator.trace(seed, 0.125, 5, Direction::Forward);
        assert_eq!(line.len(), 6);
        assert_eq!(line.points[5], line.points[4]);
        assert_eq!(line.points[4].r, 2.0);
    }

    #[test]
    fn reflect_policy_keeps_radius_inside_the_shell() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(1.0, 0.0, 0.0), BoundaryPolicy::Reflect);
        let seed = SphericalPoint::new(1.0, 1.0, 1.5);
        let line = integrator.trace(seed, 0.125, 12, Direction::Forward);
        assert_eq!(line.len(), 13);
        assert!(line.points.iter().all(|p| p.r >= 1.0 && p.r <= 2.0));
        assert_eq!(line.points[5].r, 1.875);
    }

    #[test]
    fn backward_tracing_reverses_the_step() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(1.0, 0.0, 0.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(1.0, 1.0, 1.5);
        let line = integrator.trace(seed, 0.125, 2, Direction::Backward);
        assert_eq!(line.points[2].r, 1.25);
    }

    #[test]
    fn crossing_a_pole_continues_on_the_opposite_meridian() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(0.0, 1.0, 0.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(0.5, PI - 0.05, 1.0);
        let line = integrator.trace(seed, 0.1, 1, Direction::Forward);
        let crossed = line.points[1];
        assert!((crossed.theta - (PI - 0.05)).abs() < 1e-12);
        assert!((crossed.phi - (0.5 + PI)).abs() < 1e-12);
    }

    #[test]
    fn zero_field_and_outside_seed_hold_the_seed() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(0.0, 0.0, 0.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(1.0, 1.0, 1.5);
        let line = integrator.trace(seed, 0.1, 4, Direction::Forward);
        assert_eq!(line.len(), 5);
        assert!(line.points.iter().all(|p| *p == seed));

        let integrator =
            StreamlineIntegrator::new(UniformField::new(1.0, 0.0, 0.0), BoundaryPolicy::Freeze);
        let outside = SphericalPoint::new(1.0, 1.0, 3.0);
        let line = integrator.trace(outside, 0.1, 4, Direction::Forward);
        assert_eq!(line.len(), 5);
        assert!(line.points.iter().all(|p| *p == outside));
    }

    #[test]
    fn centered_trace_puts_the_seed_in_the_middle() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(1.0, 0.0, 0.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(1.0, 1.0, 1.5);
        for len in [1usize, 4, 5] {
            let line = integrator.trace_centered(seed, 0.0625, len);
            assert_eq!(line.len(), len);
            assert_eq!(line.points[len / 2], seed);
            for pair in line.points.windows(2) {
                assert!((pair[1].r - pair[0].r - 0.0625).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn trace_ordered_dispatches_on_order() {
        let integrator =
            StreamlineIntegrator::new(UniformField::new(1.0, 0.0, 0.0), BoundaryPolicy::Freeze);
        let seed = SphericalPoint::new(1.0, 1.0, 1.5);
        let forward = integrator.trace_ordered(seed, 0.5, 4, TraceOrder::Forward);
        let backward = integrator.trace_ordered(seed, 0.5, 4, TraceOrder::Backward);
        let both = integrator.trace_ordered(seed, 0.5, 4, TraceOrder::Both);
        assert_eq!(forward.points[0], seed);
        assert_eq!(backward.points[0], seed);
        assert_eq!(both.points[2], seed);
        assert!((forward.points[4].r - 2.0).abs() < 1e-12);
        assert!((backward.points[4].r - 1.0).abs() < 1e-12);
        assert!((both.points[0].r - 1.25).abs() < 1e-12);
        assert!((both.points[4].r - 1.75).abs() < 1e-12);
    }

    #[test]
    fn seed_past_theta_extent_is_folded() {
        let mut field = UniformField::new(1.0, 0.0, 0.0);
        field.domain.theta_max = 3.0;
        let integrator = StreamlineIntegrator::new(field, BoundaryPolicy::Reflect);
        let folded = integrator.fold_seed(SphericalPoint::new(0.25, 3.1, 2.5));
        assert!((folded.theta - 2.9).abs() < 1e-12);
        assert!((folded.phi - (0.25 + PI)).abs() < 1e-12);
        assert!((folded.r - 1.5).abs() < 1e-12);
    }
}
