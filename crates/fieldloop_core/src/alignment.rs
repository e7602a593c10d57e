use log::{debug, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{LoopError, LoopResult};
use crate::geometry::Trajectory;
use crate::integrator::{Direction, StreamlineIntegrator};
use crate::traits::VectorField;

/// Index windows compared at one sliding offset. `a[al..=ar]` is paired with
/// `b[bl..=br]`; an empty window has `ar < al`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    al: i64,
    ar: i64,
    bl: i64,
    br: i64,
}

impl Window {
    fn at(na: usize, nb: usize, nmin: usize, k: usize) -> Self {
        let (na, nb, nmin, k) = (na as i64, nb as i64, nmin as i64, k as i64);
        Self {
            al: (na - 1 - nmin - k).max(0),
            ar: (na - 1).min(na + nb - 2 - nmin - k),
            bl: (nmin + k - na + 1).max(0),
            br: (nb - 1).min(nmin + k),
        }
    }

    fn matches(&self, a: &[Vector3<f64>], b: &[Vector3<f64>], tolerance: f64) -> usize {
        if self.ar < self.al {
            return 0;
        }
        let a = &a[self.al as usize..=self.ar as usize];
        let b = &b[self.bl as usize..=self.br as usize];
        a.iter()
            .zip(b)
            .filter(|(x, y)| (*x - *y).norm() <= tolerance)
            .count()
    }
}

/// Returns true when the shorter of `a` and `b` overlaps the longer one on at
/// least `floor(fraction * len)` samples within `tolerance`, and never on
/// fewer than one.
///
/// Lines more than twice as long as their partner never overlap.
pub fn overlaps(a: &[Vector3<f64>], b: &[Vector3<f64>], tolerance: f64, fraction: f64) -> bool {
    let (a, b) = if a.len() > b.len() { (b, a) } else { (a, b) };
    let (na, nb) = (a.len(), b.len());
    if na == 0 {
        return false;
    }
    if nb as f64 * 0.5 > na as f64 {
        debug!("Size difference between lines too large ({nb} vs {na} samples)");
        return false;
    }
    let nmin = (na as f64 * fraction).floor() as usize;
    // The windows follow `nmin`, the count needs at least one real match.
    let required = nmin.max(1);
    (0..(na + nb).saturating_sub(2 * nmin))
        .any(|k| Window::at(na, nb, nmin, k).matches(a, b, tolerance) >= required)
}

/// Placement of the shorter line relative to the longer one at the best offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentCase {
    /// Starts before the longer line and ends inside it.
    ExtendsLeft,
    /// Lies entirely inside the longer line.
    Inside,
    /// Starts inside the longer line and ends after it.
    ExtendsRight,
}

/// Placement of one line relative to another, seen from either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    ExtendsLeft,
    Inside,
    ExtendsRight,
    Contains,
}

impl Placement {
    /// The same placement seen from the other line.
    pub fn mirrored(self) -> Self {
        match self {
            Placement::ExtendsLeft => Placement::ExtendsRight,
            Placement::ExtendsRight => Placement::ExtendsLeft,
            Placement::Inside => Placement::Contains,
            Placement::Contains => Placement::Inside,
        }
    }
}

impl From<AlignmentCase> for Placement {
    fn from(case: AlignmentCase) -> Self {
        match case {
            AlignmentCase::ExtendsLeft => Placement::ExtendsLeft,
            AlignmentCase::Inside => Placement::Inside,
            AlignmentCase::ExtendsRight => Placement::ExtendsRight,
        }
    }
}

/// Number of integration steps a line must grow by on each side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    /// Index of the best sliding offset.
    pub offset: usize,
    /// Samples within tolerance at that offset.
    pub score: usize,
    /// Index on the longer line of the shorter line's first sample.
    pub shift: i64,
    pub case: AlignmentCase,
    /// True when the first argument was the longer line.
    pub swapped: bool,
    /// Placement of the first argument relative to the second.
    pub placement: Placement,
    pub first: Extension,
    pub second: Extension,
}

/// Finds the offset at which `a` and `b` share the most samples within
/// `tolerance`. Ties resolve to the first offset scanned.
pub fn best_alignment(
    a: &[Vector3<f64>],
    b: &[Vector3<f64>],
    tolerance: f64,
) -> LoopResult<Alignment> {
    let swapped = a.len() > b.len();
    let (short, long) = if swapped { (b, a) } else { (a, b) };
    let (na, nb) = (short.len(), long.len());
    if na == 0 {
        return Err(LoopError::Degenerate(format!(
            "cannot align lines of {} and {} samples",
            a.len(),
            b.len()
        )));
    }
    if nb == 1 {
        // Two single samples have no offsets to slide over; they coincide.
        let score = usize::from((short[0] - long[0]).norm() <= tolerance);
        return Ok(Alignment {
            offset: 0,
            score,
            shift: 0,
            case: AlignmentCase::Inside,
            swapped,
            placement: Placement::Inside,
            first: Extension::default(),
            second: Extension::default(),
        });
    }

    let nmin = 1;
    let mut best = (0usize, 0usize);
    for k in 0..(na + nb - 2 * nmin) {
        let score = Window::at(na, nb, nmin, k).matches(short, long, tolerance);
        if score > best.1 || k == 0 {
            best = (k, score);
        }
    }
    let (offset, score) = best;
    let window = Window::at(na, nb, nmin, offset);
    let last = na as i64 - 1;
    let case = if window.al > 0 && window.ar == last {
        AlignmentCase::ExtendsLeft
    } else if window.al == 0 && window.ar == last {
        AlignmentCase::Inside
    } else if window.al == 0 && window.ar < last {
        AlignmentCase::ExtendsRight
    } else {
        return Err(LoopError::UnhandledAlignmentCase {
            al: window.al.max(0) as usize,
            ar: window.ar.max(0) as usize,
            bl: window.bl.max(0) as usize,
            br: window.br.max(0) as usize,
            na,
            nb,
        });
    };

    let (al, ar, bl, br) = (
        window.al as usize,
        window.ar as usize,
        window.bl as usize,
        window.br as usize,
    );
    let (short_ext, long_ext) = match case {
        AlignmentCase::ExtendsLeft => (
            Extension {
                left: 0,
                right: nb - 1 - br,
            },
            Extension { left: al, right: 0 },
        ),
        AlignmentCase::Inside => (
            Extension {
                left: bl,
                right: nb - 1 - br,
            },
            Extension::default(),
        ),
        AlignmentCase::ExtendsRight => (
            Extension { left: bl, right: 0 },
            Extension {
                left: 0,
                right: na - 1 - ar,
            },
        ),
    };
    debug!("Best alignment {case:?} at offset {offset} with {score} of {na} samples matched");

    let placement = Placement::from(case);
    let shift = (offset + 2 * nmin) as i64 - na as i64;
    Ok(if swapped {
        Alignment {
            offset,
            score,
            shift,
            case,
            swapped,
            placement: placement.mirrored(),
            first: long_ext,
            second: short_ext,
        }
    } else {
        Alignment {
            offset,
            score,
            shift,
            case,
            swapped,
            placement,
            first: short_ext,
            second: long_ext,
        }
    })
}

/// Grows `line` by whole integration steps at either end. The original samples
/// are kept untouched in the middle of the result.
pub fn extend_line<F: VectorField>(
    line: &Trajectory,
    extension: Extension,
    integrator: &StreamlineIntegrator<F>,
    step: f64,
) -> Trajectory {
    let mut out = line.clone();
    if extension.left > 0 {
        if let Some(&first) = line.first() {
            let backward = integrator.trace(first, step, extension.left, Direction::Backward);
            out.prepend_backward(&backward);
        }
    }
    if extension.right > 0 {
        if let Some(&last) = line.last() {
            let forward = integrator.trace(last, step, extension.right, Direction::Forward);
            out.append_forward(&forward);
        }
    }
    out
}

/// Extends `a` and `b` so that both cover the stretch spanned by their best
/// alignment. The results have equal length.
pub fn match_length<F: VectorField>(
    a: &Trajectory,
    b: &Trajectory,
    tolerance: f64,
    integrator: &StreamlineIntegrator<F>,
    step: f64,
) -> LoopResult<(Trajectory, Trajectory)> {
    let alignment = best_alignment(&a.cartesian(), &b.cartesian(), tolerance)?;
    let a = extend_line(a, alignment.first, integrator, step);
    let b = extend_line(b, alignment.second, integrator, step);
    if a.len() != b.len() {
        warn!(
            "{}",
            LoopError::DimensionMismatch {
                expected: a.len(),
                found: b.len(),
            }
        );
    }
    Ok((a, b))
}

/// Extends every member of a structure to a common length.
///
/// The first longest member is the reference. Every other member is placed on
/// the reference's index axis by its best alignment against it; each member is
/// then grown by the largest left and right requirement implied by any other
/// member.
pub fn match_length_group<F: VectorField>(
    lines: &[Trajectory],
    tolerance: f64,
    integrator: &StreamlineIntegrator<F>,
    step: f64,
) -> LoopResult<Vec<Trajectory>> {
    let Some(reference) = longest(lines) else {
        return Ok(Vec::new());
    };
    let reference_xyz = lines[reference].cartesian();

    let mut spans = Vec::with_capacity(lines.len());
    for (j, line) in lines.iter().enumerate() {
        let start = if j == reference {
            0
        } else {
            best_alignment(&line.cartesian(), &reference_xyz, tolerance)?.shift
        };
        spans.push((start, start + line.len() as i64 - 1));
    }

    let mut out = Vec::with_capacity(lines.len());
    for (j, line) in lines.iter().enumerate() {
        let (start, end) = spans[j];
        let extension = spans.iter().fold(Extension::default(), |acc, &(s, e)| Extension {
            left: acc.left.max((start - s).max(0) as usize),
            right: acc.right.max((e - end).max(0) as usize),
        });
        out.push(extend_line(line, extension, integrator, step));
    }

    let expected = out.first().map_or(0, Trajectory::len);
    if let Some(mismatch) = out.iter().find(|line| line.len() != expected) {
        warn!(
            "{}",
            LoopError::DimensionMismatch {
                expected,
                found: mismatch.len(),
            }
        );
    }
    Ok(out)
}

fn longest(lines: &[Trajectory]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (j, line) in lines.iter().enumerate() {
        match best {
            Some(b) if lines[b].len() >= line.len() => {}
            _ => best = Some(j),
        }
    }
    best
}
