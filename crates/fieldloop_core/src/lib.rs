//! The `fieldloop_core` crate extracts coherent magnetic loop structures from
//! spherical simulation snapshots.
//!
//! Key components:
//! - **Field**: trilinear sampling of a field given on a (φ, θ, r) lattice.
//! - **Integrator**: fixed arclength field-line tracing with pole crossing and
//!   radial boundary policies.
//! - **Alignment / Merge**: overlap tests, length matching, greedy clustering
//!   of loop candidates and Monte-Carlo reduction to a centerline plus radius.
//! - **Mesh**: tube surfaces swept along merged centerlines.
//! - **Segments / Features**: channel derivation for the external classifiers
//!   and run-pattern detection on their per-sample labels.
//! - **Snapshot**: the per-snapshot pipeline and a bounded worker pool.
pub mod alignment;
pub mod config;
pub mod error;
pub mod features;
pub mod field;
pub mod geometry;
pub mod integrator;
pub mod merge;
pub mod mesh;
pub mod segments;
pub mod snapshot;
pub mod traits;

pub use config::LoopSettings;
pub use error::{LoopError, LoopResult};
pub use field::{FieldComponents, FieldSampler};
pub use geometry::{SphericalPoint, Trajectory};
pub use snapshot::{process_snapshot, run_snapshots, trace_seed_lines, SnapshotReport};
pub use traits::{Classifier, Segmenter, VectorField};
