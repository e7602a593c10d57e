use std::f64::consts::TAU;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::TubeSettings;
use crate::error::{LoopError, LoopResult};

const NORM_EPS: f64 = 1e-12;

/// Triangulated tube. `points` holds `rings * segments` vertices as flat
/// `[x, y, z, ...]`; ring `k` surrounds centerline sample `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TubeMesh {
    pub rings: usize,
    pub segments: usize,
    pub points: Vec<f64>,
    pub triangles: Vec<u32>,
}

impl TubeMesh {
    pub fn vertex(&self, ring: usize, segment: usize) -> Vector3<f64> {
        let base = (ring * self.segments + segment) * 3;
        Vector3::new(
            self.points[base],
            self.points[base + 1],
            self.points[base + 2],
        )
    }
}

/// Local frame of the centerline at one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub tangent: Vector3<f64>,
    pub normal: Vector3<f64>,
    pub binormal: Vector3<f64>,
}

/// Derivative with respect to the sample index: five-point stencil in the
/// interior, centered differences next to the ends, one-sided at the ends.
pub fn index_derivative(values: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    let n = values.len();
    if n < 2 {
        return vec![Vector3::zeros(); n];
    }
    (0..n)
        .map(|k| {
            if k == 0 {
                values[1] - values[0]
            } else if k == n - 1 {
                values[n - 1] - values[n - 2]
            } else if k == 1 || k == n - 2 {
                (values[k + 1] - values[k - 1]) / 2.0
            } else {
                (values[k - 2] - values[k - 1] * 8.0 + values[k + 1] * 8.0 - values[k + 2]) / 12.0
            }
        })
        .collect()
}

/// Builds the (tangent, normal, binormal) frame at every centerline sample.
///
/// The normal is the derivative of the tangent and the binormal their cross
/// product. Where either vanishes the nearest sample with a usable direction
/// is copied; a straight centerline falls back to a fixed direction
/// orthogonal to the tangent.
pub fn frames(centerline: &[Vector3<f64>]) -> LoopResult<Vec<Frame>> {
    if centerline.len() < 2 {
        return Err(LoopError::Degenerate(format!(
            "tube centerline needs at least 2 samples, got {}",
            centerline.len()
        )));
    }
    let tangents = index_derivative(centerline);
    let normals = index_derivative(&tangents);
    let scale = tangents.iter().map(|t| t.norm()).fold(0.0, f64::max);

    let unit_tangents = fill_degenerate(&tangents, scale * NORM_EPS).ok_or_else(|| {
        LoopError::Degenerate("tube centerline has zero length".to_string())
    })?;

    let binormals: Vec<Vector3<f64>> = tangents
        .iter()
        .zip(&normals)
        .map(|(t, n)| t.cross(n))
        .collect();
    let frames = match (
        fill_degenerate(&normals, scale * NORM_EPS.sqrt()),
        fill_degenerate(&binormals, scale * scale * NORM_EPS.sqrt()),
    ) {
        (Some(normals), Some(binormals)) => unit_tangents
            .into_iter()
            .zip(normals)
            .zip(binormals)
            .map(|((tangent, normal), binormal)| Frame {
                tangent,
                normal,
                binormal,
            })
            .collect(),
        _ => unit_tangents
            .into_iter()
            .map(|tangent| {
                let normal = canonical_orthogonal_unit(&tangent);
                Frame {
                    tangent,
                    normal,
                    binormal: tangent.cross(&normal),
                }
            })
            .collect(),
    };
    Ok(frames)
}

/// Sweeps a circle of the local radius around every centerline sample and
/// stitches consecutive rings into triangles.
pub fn build_tube(
    centerline: &[Vector3<f64>],
    radius: &[f64],
    settings: &TubeSettings,
) -> LoopResult<TubeMesh> {
    if radius.len() != centerline.len() {
        return Err(LoopError::DimensionMismatch {
            expected: centerline.len(),
            found: radius.len(),
        });
    }
    let segments = settings.segments;
    if segments < 3 {
        return Err(LoopError::Degenerate(format!(
            "tube cross-sections need at least 3 segments, got {segments}"
        )));
    }
    let frames = frames(centerline)?;

    let angles: Vec<(f64, f64)> = (0..segments)
        .map(|j| (TAU * j as f64 / segments as f64).sin_cos())
        .collect();
    let mut points = Vec::with_capacity(centerline.len() * segments * 3);
    for ((center, frame), &r) in centerline.iter().zip(&frames).zip(radius) {
        for &(sin_a, cos_a) in &angles {
            let vertex = center + (frame.normal * sin_a + frame.binormal * cos_a) * r;
            points.extend_from_slice(&[vertex.x, vertex.y, vertex.z]);
        }
    }

    let rings = centerline.len();
    let mut triangles = Vec::with_capacity((rings - 1) * segments * 6);
    for k in 0..rings - 1 {
        for j in 0..segments {
            let a = (k * segments + j) as u32;
            let b = (k * segments + (j + 1) % segments) as u32;
            let c = ((k + 1) * segments + j) as u32;
            let d = ((k + 1) * segments + (j + 1) % segments) as u32;
            triangles.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    Ok(TubeMesh {
        rings,
        segments,
        points,
        triangles,
    })
}

/// Normalizes every vector, replacing those shorter than `min_norm` by the
/// unit vector of the nearest usable sample. Returns `None` when no sample is
/// usable.
fn fill_degenerate(vectors: &[Vector3<f64>], min_norm: f64) -> Option<Vec<Vector3<f64>>> {
    let units: Vec<Option<Vector3<f64>>> = vectors
        .iter()
        .map(|v| {
            let norm = v.norm();
            (norm.is_finite() && norm > min_norm).then(|| v / norm)
        })
        .collect();
    if units.iter().all(Option::is_none) {
        return None;
    }
    let n = units.len();
    let nearest = |k: usize| -> Option<Vector3<f64>> {
        (1..n).find_map(|d| {
            let before = k.checked_sub(d).and_then(|i| units[i]);
            let after = units.get(k + d).copied().flatten();
            before.or(after)
        })
    };
    Some(
        (0..n)
            .map(|k| units[k].or_else(|| nearest(k)).unwrap_or_else(Vector3::x))
            .collect(),
    )
}

/// Unit vector orthogonal to `basis`, built from the coordinate axis with the
/// largest component left after projecting out `basis`.
fn canonical_orthogonal_unit(basis: &Vector3<f64>) -> Vector3<f64> {
    let mut best = (0.0, Vector3::x());
    for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
        let candidate = axis - basis * axis.dot(basis);
        let norm = candidate.norm();
        if norm > best.0 {
            best = (norm, candidate / norm);
        }
    }
    best.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helix(n: usize) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|i| {
                let t = 0.2 * i as f64;
                Vector3::new(t.cos(), t.sin(), 0.1 * t)
            })
            .collect()
    }

    #[test]
    fn index_derivative_is_exact_for_quadratics() {
        let values: Vec<Vector3<f64>> = (0..7)
            .map(|i| {
                let x = i as f64;
                Vector3::new(x * x, 3.0 * x, 1.0)
            })
            .collect();
        let d = index_derivative(&values);
        for k in 1..6 {
            assert!((d[k].x - 2.0 * k as f64).abs() < 1e-12, "k = {k}");
            assert!((d[k].y - 3.0).abs() < 1e-12);
            assert_eq!(d[k].z, 0.0);
        }
        assert_eq!(d[0].x, 1.0);
        assert_eq!(d[6].x, 11.0);
    }

    #[test]
    fn frames_are_unit_and_binormal_is_orthogonal() {
        let frames = frames(&helix(30)).expect("frames");
        for frame in &frames {
            assert!((frame.tangent.norm() - 1.0).abs() < 1e-12);
            assert!((frame.normal.norm() - 1.0).abs() < 1e-12);
            assert!((frame.binormal.norm() - 1.0).abs() < 1e-12);
            assert!(frame.binormal.dot(&frame.tangent).abs() < 1e-9);
            assert!(frame.binormal.dot(&frame.normal).abs() < 1e-9);
        }
    }

    #[test]
    fn straight_centerline_uses_an_orthogonal_fallback() {
        let line: Vec<Vector3<f64>> = (0..5).map(|i| Vector3::new(0.0, 0.0, i as f64)).collect();
        let frames = frames(&line).expect("frames");
        for frame in &frames {
            assert!(frame.normal.dot(&frame.tangent).abs() < 1e-12);
            assert!((frame.normal.norm() - 1.0).abs() < 1e-12);
            assert!((frame.binormal.norm() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn tube_vertices_lie_at_the_local_radius() {
        let centerline = helix(20);
        let radius: Vec<f64> = (0..20).map(|i| 0.05 + 0.01 * i as f64).collect();
        let settings = TubeSettings { segments: 12 };
        let mesh = build_tube(&centerline, &radius, &settings).expect("mesh");
        assert_eq!(mesh.rings, 20);
        assert_eq!(mesh.points.len(), 20 * 12 * 3);
        assert_eq!(mesh.triangles.len(), 19 * 12 * 6);
        assert!(mesh.triangles.iter().all(|&i| (i as usize) < 20 * 12));
        let frames = frames(&centerline).expect("frames");
        for k in 0..20 {
            for j in 0..12 {
                let offset = mesh.vertex(k, j) - centerline[k];
                assert!((offset.norm() - radius[k]).abs() < 1e-12);
                assert!(offset.dot(&frames[k].binormal.cross(&frames[k].normal)).abs() < 1e-12);
            }
        }
        // Segment 0 sits along the binormal.
        let first = mesh.vertex(3, 0) - centerline[3];
        assert!((first - frames[3].binormal * radius[3]).norm() < 1e-12);
    }

    #[test]
    fn zero_radius_collapses_rings_onto_the_centerline() {
        let centerline = helix(6);
        let mesh = build_tube(&centerline, &[0.0; 6], &TubeSettings::default()).expect("mesh");
        for k in 0..6 {
            assert!((mesh.vertex(k, 37) - centerline[k]).norm() < 1e-15);
        }
    }

    #[test]
    fn build_tube_rejects_bad_inputs() {
        let centerline = helix(6);
        let err = build_tube(&centerline, &[1.0; 5], &TubeSettings::default()).expect_err("len");
        assert!(matches!(
            err,
            LoopError::DimensionMismatch {
                expected: 6,
                found: 5
            }
        ));
        let err = build_tube(&centerline[..1], &[1.0], &TubeSettings::default()).expect_err("short");
        assert!(matches!(err, LoopError::Degenerate(_)));
        let err = build_tube(&[centerline[0]; 4], &[1.0; 4], &TubeSettings::default())
            .expect_err("zero length");
        assert!(matches!(err, LoopError::Degenerate(_)));
    }
}
