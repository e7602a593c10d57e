use std::f64::consts::TAU;

use anyhow::{bail, Result};
use log::debug;

use crate::error::{LoopError, LoopResult};
use crate::geometry::SphericalPoint;
use crate::traits::{Domain, FieldSample, VectorField};

/// Axis coordinates of the lattice. `phi` includes the wrap-around sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SphericalGrid {
    pub phi: Vec<f64>,
    pub theta: Vec<f64>,
    pub r: Vec<f64>,
}

impl SphericalGrid {
    fn index(&self, ip: usize, it: usize, ir: usize) -> usize {
        (ip * self.theta.len() + it) * self.r.len() + ir
    }
}

/// Raw component arrays in (φ, θ, r) row-major order, r varying fastest.
#[derive(Debug, Clone, Default)]
pub struct FieldComponents {
    pub br: Vec<f64>,
    pub btheta: Vec<f64>,
    pub bphi: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FieldSampler {
    grid: SphericalGrid,
    br: Vec<f64>,
    btheta: Vec<f64>,
    bphi: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct AxisCell {
    index: usize,
    weight: f64,
}

impl FieldSampler {
    /// Builds a sampler from decoded simulation output.
    ///
    /// `theta` and `radii` must be ascending once the duplicated interface
    /// radius (if any) has been removed.
    pub fn from_raw(
        phi_count: usize,
        theta: Vec<f64>,
        radii: Vec<f64>,
        components: FieldComponents,
    ) -> Result<Self> {
        if phi_count == 0 {
            bail!("Longitude axis must have at least one sample.");
        }
        let nt = theta.len();
        let nr_raw = radii.len();
        let expected = phi_count * nt * nr_raw;
        for (name, values) in [
            ("B_r", &components.br),
            ("B_theta", &components.btheta),
            ("B_phi", &components.bphi),
        ] {
            if values.len() != expected {
                bail!(
                    "{name} has {} values; grid {}x{}x{} needs {}.",
                    values.len(),
                    phi_count,
                    nt,
                    nr_raw,
                    expected
                );
            }
        }

        let overlap = radii.windows(2).position(|pair| pair[0] == pair[1]);
        let mut r = radii;
        if let Some(index) = overlap {
            debug!("Removing duplicated interface radius at index {index}");
            r.remove(index);
        }

        validate_axis("theta", &theta)?;
        validate_axis("r", &r)?;
        if theta[0] < 0.0 || theta[nt - 1] > std::f64::consts::PI {
            bail!("theta axis must lie within [0, pi].");
        }

        let phi: Vec<f64> = (0..=phi_count)
            .map(|i| TAU * i as f64 / phi_count as f64)
            .collect();
        let grid = SphericalGrid { phi, theta, r };

        let prepare = |values: Vec<f64>| -> Vec<f64> {
            let mut kept = match overlap {
                Some(skip) => values
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| i % nr_raw != skip)
                    .map(|(_, v)| v)
                    .collect::<Vec<_>>(),
                None => values,
            };
            let slice = nt * (nr_raw - overlap.map_or(0, |_| 1));
            let wrap: Vec<f64> = kept[..slice].to_vec();
            kept.extend_from_slice(&wrap);
            kept
        };

        Ok(Self {
            br: prepare(components.br),
            btheta: prepare(components.btheta),
            bphi: prepare(components.bphi),
            grid,
        })
    }

    pub fn grid(&self) -> &SphericalGrid {
        &self.grid
    }

    fn interpolate(&self, values: &[f64], cells: &[AxisCell; 3]) -> f64 {
        let [p, t, r] = cells;
        let mut accum = 0.0;
        for dp in 0..2 {
            let wp = if dp == 0 { 1.0 - p.weight } else { p.weight };
            if wp == 0.0 {
                continue;
            }
            for dt in 0..2 {
                let wt = if dt == 0 { 1.0 - t.weight } else { t.weight };
                if wt == 0.0 {
                    continue;
                }
                for dr in 0..2 {
                    let wr = if dr == 0 { 1.0 - r.weight } else { r.weight };
                    if wr == 0.0 {
                        continue;
                    }
                    let idx = self.grid.index(p.index + dp, t.index + dt, r.index + dr);
                    accum += wp * wt * wr * values[idx];
                }
            }
        }
        accum
    }
}

impl VectorField for FieldSampler {
    fn sample(&self, point: &SphericalPoint) -> LoopResult<FieldSample> {
        let out_of_domain = || LoopError::OutOfDomain {
            phi: point.phi,
            theta: point.theta,
            r: point.r,
        };
        let cells = [
            locate(&self.grid.phi, point.phi).ok_or_else(out_of_domain)?,
            locate(&self.grid.theta, point.theta).ok_or_else(out_of_domain)?,
            locate(&self.grid.r, point.r).ok_or_else(out_of_domain)?,
        ];
        Ok(FieldSample {
            br: self.interpolate(&self.br, &cells),
            btheta: self.interpolate(&self.btheta, &cells),
            bphi: self.interpolate(&self.bphi, &cells),
        })
    }

    fn domain(&self) -> Domain {
        let theta = &self.grid.theta;
        let r = &self.grid.r;
        Domain {
            theta_min: theta[0],
            theta_max: theta[theta.len() - 1],
            r_min: r[0],
            r_max: r[r.len() - 1],
        }
    }
}

fn validate_axis(name: &str, axis: &[f64]) -> Result<()> {
    if axis.len() < 2 {
        bail!("{name} axis needs at least 2 samples, got {}.", axis.len());
    }
    if axis.iter().any(|v| !v.is_finite()) {
        bail!("{name} axis contains non-finite values.");
    }
    if axis.windows(2).any(|pair| pair[1] <= pair[0]) {
        bail!("{name} axis must be strictly ascending.");
    }
    Ok(())
}

/// Finds the cell containing `x` and the fractional position inside it.
/// Returns `None` outside `[axis[0], axis[n-1]]` (and for NaN).
fn locate(axis: &[f64], x: f64) -> Option<AxisCell> {
    let n = axis.len();
    if !(x >= axis[0] && x <= axis[n - 1]) {
        return None;
    }
    let upper = axis.partition_point(|&v| v <= x);
    let index = upper.saturating_sub(1).min(n - 2);
    let weight = (x - axis[index]) / (axis[index + 1] - axis[index]);
    Some(AxisCell {
        index,
        weight: weight.clamp(0.0, 1.0),
    })
}
