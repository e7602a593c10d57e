use std::ops::Range;

use anyhow::{Context, Result};
use log::{info, warn};
use nalgebra::Vector3;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{IntegrationSettings, LoopSettings};
use crate::error::LoopError;
use crate::features::{derive_channels, normalize_channels, LineChannels};
use crate::geometry::{SphericalPoint, Trajectory};
use crate::integrator::{BoundaryPolicy, StreamlineIntegrator};
use crate::merge::{detect_structures, StructureMerger};
use crate::mesh::{build_tube, TubeMesh};
use crate::segments::detect_loops;
use crate::traits::{Classifier, Segmenter, VectorField};

/// A stretch of one accepted line flagged as a loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSegment {
    /// Index of the line in the snapshot's input.
    pub line: usize,
    pub range: Range<usize>,
    pub trajectory: Trajectory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedStructure {
    /// Indices into [`SnapshotReport::candidates`].
    pub members: Vec<usize>,
    pub centerline: Trajectory,
    pub radius: Vec<f64>,
    /// `None` when the centerline is too short to sweep a tube along.
    pub mesh: Option<TubeMesh>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotReport {
    /// Indices of the lines scoring above the classifier threshold.
    pub accepted_lines: Vec<usize>,
    pub candidates: Vec<CandidateSegment>,
    pub structures: Vec<MergedStructure>,
}

/// Traces one seed line per seed in the configured order.
pub fn trace_seed_lines<F: VectorField + ?Sized>(
    field: &F,
    seeds: &[SphericalPoint],
    settings: &IntegrationSettings,
) -> Vec<Trajectory> {
    let integrator = StreamlineIntegrator::new(field, BoundaryPolicy::Freeze);
    seeds
        .iter()
        .map(|&seed| {
            integrator.trace_ordered(seed, settings.arclength, settings.steps, settings.order)
        })
        .collect()
}

/// Runs the full loop extraction on the lines of one snapshot.
pub fn process_snapshot<F, C, S, R>(
    field: &F,
    lines: &[Trajectory],
    classifier: &C,
    segmenter: &S,
    settings: &LoopSettings,
    rng: &mut R,
) -> Result<SnapshotReport>
where
    F: VectorField + ?Sized,
    C: Classifier + ?Sized,
    S: Segmenter + ?Sized,
    R: Rng + ?Sized,
{
    settings.validate()?;

    let mut channels: Vec<LineChannels> =
        lines.iter().map(|line| derive_channels(line, field)).collect();
    normalize_channels(&mut channels);

    let threshold = settings.detection.classifier_threshold;
    let accepted_lines: Vec<usize> = channels
        .iter()
        .enumerate()
        .filter(|(_, line)| classifier.score(line) > threshold)
        .map(|(i, _)| i)
        .collect();
    info!("Kept {} out of {} lines", accepted_lines.len(), lines.len());

    let mut candidates = Vec::new();
    for &i in &accepted_lines {
        let labels = segmenter.segment(&channels[i]);
        if labels.len() != lines[i].len() {
            return Err(LoopError::DimensionMismatch {
                expected: lines[i].len(),
                found: labels.len(),
            })
            .with_context(|| format!("Segmenter labels for line {i} do not cover the line."));
        }
        for range in detect_loops(&labels, &settings.detection) {
            candidates.push(CandidateSegment {
                line: i,
                trajectory: lines[i].slice(range.clone()),
                range,
            });
        }
    }
    info!(
        "Found {} loop candidates in {} loopy lines",
        candidates.len(),
        accepted_lines.len()
    );

    let xyz: Vec<Vec<Vector3<f64>>> = candidates
        .iter()
        .map(|candidate| candidate.trajectory.cartesian())
        .collect();
    let groups = detect_structures(
        &xyz,
        settings.merge.overlap_tolerance(),
        settings.merge.overlap_fraction,
    );

    let merger = StructureMerger::new(field, settings.integration.step(), settings.merge);
    let mut structures = Vec::with_capacity(groups.len());
    for (index, members) in groups.into_iter().enumerate() {
        let segments: Vec<Trajectory> = members
            .iter()
            .map(|&j| candidates[j].trajectory.clone())
            .collect();
        let reduced = merger
            .reduce(&segments, rng)
            .with_context(|| format!("Failed to merge structure {index}."))?;
        let centerline_xyz = reduced.centerline.cartesian();
        let mesh = match build_tube(&centerline_xyz, &reduced.radius, &settings.tube) {
            Ok(mesh) => Some(mesh),
            Err(LoopError::Degenerate(reason)) => {
                warn!("Structure {index} has no tube mesh: {reason}");
                None
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to mesh structure {index}."));
            }
        };
        structures.push(MergedStructure {
            members,
            centerline: reduced.centerline,
            radius: reduced.radius,
            mesh,
        });
    }
    info!("Merged {} candidates into {} structures", candidates.len(), structures.len());

    Ok(SnapshotReport {
        accepted_lines,
        candidates,
        structures,
    })
}

/// Runs `worker` over every job on a pool of at most `max_workers` threads.
///
/// Results come back in job order. A failing job is logged and reported in
/// its own slot without affecting the others.
pub fn run_snapshots<J, T, W>(jobs: Vec<J>, max_workers: usize, worker: W) -> Result<Vec<Result<T>>>
where
    J: Send,
    T: Send,
    W: Fn(J) -> Result<T> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers.max(1))
        .build()
        .context("Failed to build the snapshot worker pool.")?;
    let results = pool.install(|| {
        jobs.into_par_iter()
            .enumerate()
            .map(|(index, job)| {
                let result = worker(job);
                if let Err(err) = &result {
                    warn!("Snapshot job {index} failed: {err:#}");
                }
                result
            })
            .collect()
    });
    Ok(results)
}
