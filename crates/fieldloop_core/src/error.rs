use thiserror::Error;

use crate::merge::MergeDiagnostic;

/// Failure modes of the tracing and merging core.
///
/// Only `OutOfDomain` is recovered locally (the integrator freezes the line in
/// place). The remaining variants abort the snapshot they occur in.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Point (phi={phi:.4}, theta={theta:.4}, r={r:.4e}) lies outside the interpolation domain")]
    OutOfDomain { phi: f64, theta: f64, r: f64 },

    #[error(
        "Unhandled alignment case: shorter line window [{al}, {ar}] of {na} points against longer window [{bl}, {br}] of {nb} points"
    )]
    UnhandledAlignmentCase {
        al: usize,
        ar: usize,
        bl: usize,
        br: usize,
        na: usize,
        nb: usize,
    },

    #[error(
        "Structure merge did not converge after a mulligan ({} of {} lines kept)",
        .0.kept_lines,
        .0.requested_lines
    )]
    NonConvergentMerge(Box<MergeDiagnostic>),

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Degenerate input: {0}")]
    Degenerate(String),
}

pub type LoopResult<T> = Result<T, LoopError>;
