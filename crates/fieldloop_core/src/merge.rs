use log::{debug, warn};
use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::alignment::{match_length_group, overlaps};
use crate::config::MergeSettings;
use crate::error::{LoopError, LoopResult};
use crate::geometry::{distance_profile, SphericalPoint, Trajectory};
use crate::integrator::{BoundaryPolicy, StreamlineIntegrator};
use crate::traits::VectorField;

const BOX_GROWTH: f64 = 1.25;
const MAX_MISSES: usize = 15;
const SHRINKS_PER_KEPT_LINE: i64 = 5;

/// Groups candidate segments that overlap into structures.
///
/// Candidates are visited in order. Each one joins the first structure that
/// contains a member it overlaps with, or opens a new structure. The result
/// therefore depends on the candidate order.
pub fn detect_structures(
    segments: &[Vec<Vector3<f64>>],
    tolerance: f64,
    fraction: f64,
) -> Vec<Vec<usize>> {
    let mut structures: Vec<Vec<usize>> = Vec::new();
    for (j, segment) in segments.iter().enumerate() {
        let home = structures.iter().position(|members| {
            members
                .iter()
                .any(|&m| overlaps(segment, &segments[m], tolerance, fraction))
        });
        match home {
            Some(index) => structures[index].push(j),
            None => structures.push(vec![j]),
        }
    }
    debug!(
        "Grouped {} candidates into {} structures",
        segments.len(),
        structures.len()
    );
    structures
}

/// State of a reduction that failed to converge, kept for offline inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDiagnostic {
    /// Structure members after length matching.
    pub members: Vec<Trajectory>,
    pub centerline: Trajectory,
    pub last_trial: Option<Trajectory>,
    pub kept_lines: usize,
    pub requested_lines: usize,
    pub shrinks: i64,
}

/// A structure reduced to its centerline and the 2σ scatter around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducedStructure {
    pub centerline: Trajectory,
    pub radius: Vec<f64>,
    /// Structure members after length matching.
    pub members: Vec<Trajectory>,
}

/// Half-widths of the seeding box in (φ, θ, r) around `origin`.
#[derive(Debug, Clone, Copy)]
struct SeedBox {
    origin: SphericalPoint,
    dphi: f64,
    dtheta: f64,
    dr: f64,
}

impl SeedBox {
    fn around(origin: SphericalPoint, radius: f64) -> Self {
        Self {
            origin,
            dphi: radius / origin.theta.sin() / origin.r,
            dtheta: radius / origin.r,
            dr: radius,
        }
    }

    fn scale(&mut self, factor: f64) {
        self.dphi *= factor;
        self.dtheta *= factor;
        self.dr *= factor;
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> SphericalPoint {
        let mut offset = || 2.0 * rng.gen::<f64>() - 1.0;
        SphericalPoint {
            phi: self.origin.phi + offset() * self.dphi,
            theta: self.origin.theta + offset() * self.dtheta,
            r: self.origin.r + offset() * self.dr,
        }
    }
}

/// Adaptive state of the seed search: the box grows after a first-try hit
/// and shrinks after more than `MAX_MISSES` misses in a row.
#[derive(Debug, Clone, Copy)]
struct SeedSearch {
    seed_box: SeedBox,
    misses: usize,
    shrinks: i64,
}

impl SeedSearch {
    fn new(origin: SphericalPoint, radius: f64) -> Self {
        Self {
            seed_box: SeedBox::around(origin, radius),
            misses: 0,
            shrinks: 0,
        }
    }

    fn record(&mut self, accepted: bool) {
        if accepted {
            if self.misses == 0 {
                self.seed_box.scale(BOX_GROWTH);
                self.shrinks -= 1;
                debug!("First-try hit, grew the seeding box to dr = {:.4e}", self.seed_box.dr);
            }
            self.misses = 0;
        } else if self.misses > MAX_MISSES {
            self.seed_box.scale(1.0 / BOX_GROWTH);
            self.shrinks += 1;
            self.misses = 0;
            debug!(
                "Lines too divergent, shrunk the seeding box to dr = {:.4e}",
                self.seed_box.dr
            );
        } else {
            self.misses += 1;
        }
    }

    fn stalled(&self, kept: usize) -> bool {
        self.shrinks >= SHRINKS_PER_KEPT_LINE * kept as i64
    }
}

/// Reduces structures traced through one field.
///
/// Trial lines are integrated with radial reflection so that seeds near the
/// shell boundaries still yield full-length lines.
pub struct StructureMerger<F> {
    integrator: StreamlineIntegrator<F>,
    step: f64,
    settings: MergeSettings,
}

impl<F: VectorField> StructureMerger<F> {
    pub fn new(field: F, step: f64, settings: MergeSettings) -> Self {
        Self {
            integrator: StreamlineIntegrator::new(field, BoundaryPolicy::Reflect),
            step,
            settings,
        }
    }

    /// Merges `members` into a centerline and a radius profile of equal length.
    pub fn reduce<R: Rng + ?Sized>(
        &self,
        members: &[Trajectory],
        rng: &mut R,
    ) -> LoopResult<ReducedStructure> {
        if members.is_empty() {
            return Err(LoopError::Degenerate(
                "cannot reduce a structure without members".to_string(),
            ));
        }
        let settings = &self.settings;
        let aligned = match_length_group(
            members,
            settings.overlap_tolerance(),
            &self.integrator,
            self.step,
        )?;
        let n = aligned.first().map_or(0, Trajectory::len);
        if n == 0 {
            return Err(LoopError::Degenerate(
                "structure members have no samples".to_string(),
            ));
        }
        let mid = n / 2;

        let consensus = aligned
            .iter()
            .map(|line| line.points[mid].to_cartesian())
            .sum::<Vector3<f64>>()
            / aligned.len() as f64;
        let origin = SphericalPoint::from_cartesian(&consensus);
        let mut centerline = self.integrator.trace_centered(origin, self.step, n);
        let mut center_xyz = centerline.cartesian();
        let mut search = SeedSearch::new(origin, settings.seed_radius);

        let acceptance = settings.acceptance_radius();
        let requested = settings.lines_per_structure;
        let mut distances: Vec<Vec<f64>> = vec![vec![0.0; n]];
        let mut mulliganed = false;
        let mut last_trial = None;

        while distances.len() < requested {
            let trial = self
                .integrator
                .trace_centered(search.seed_box.draw(rng), self.step, n);
            let dist = distance_profile(&trial.cartesian(), &center_xyz);
            // NaN distances fail the comparison and count as misses.
            let accepted = dist.iter().all(|&d| d <= acceptance);
            if accepted {
                distances.push(dist);
            }
            search.record(accepted);
            last_trial = Some(trial);

            if search.stalled(distances.len()) {
                if mulliganed {
                    return Err(LoopError::NonConvergentMerge(Box::new(MergeDiagnostic {
                        members: aligned,
                        centerline,
                        last_trial,
                        kept_lines: distances.len(),
                        requested_lines: requested,
                        shrinks: search.shrinks,
                    })));
                }
                let closest = closest_member(&aligned, &center_xyz);
                warn!(
                    "Shrunk the seeding box {} times, restarting from member {closest} as the centerline",
                    search.shrinks
                );
                centerline = aligned[closest].clone();
                center_xyz = centerline.cartesian();
                search = SeedSearch::new(centerline.points[mid], settings.seed_radius);
                distances = vec![vec![0.0; n]];
                mulliganed = true;
            }
        }

        let radius = two_sigma_profile(&distances, n);
        Ok(ReducedStructure {
            centerline,
            radius,
            members: aligned,
        })
    }
}

/// Index of the member with the smallest mean squared distance to `center`.
fn closest_member(members: &[Trajectory], center: &[Vector3<f64>]) -> usize {
    let mut best = (0, f64::INFINITY);
    for (j, member) in members.iter().enumerate() {
        let xyz = member.cartesian();
        let msd = xyz
            .iter()
            .zip(center)
            .map(|(p, c)| (p - c).norm_squared())
            .sum::<f64>()
            / xyz.len().max(1) as f64;
        if msd < best.1 {
            best = (j, msd);
        }
    }
    best.0
}

/// Twice the population standard deviation of every column of `rows`.
fn two_sigma_profile(rows: &[Vec<f64>], n: usize) -> Vec<f64> {
    let count = rows.len() as f64;
    (0..n)
        .map(|i| {
            let mean = rows.iter().map(|row| row[i]).sum::<f64>() / count;
            let var = rows
                .iter()
                .map(|row| (row[i] - mean).powi(2))
                .sum::<f64>()
                / count;
            2.0 * var.sqrt()
        })
        .collect()
}
