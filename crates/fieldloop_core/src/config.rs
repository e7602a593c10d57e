use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::integrator::TraceOrder;
use crate::segments::LoopPatterns;

pub const DEFAULT_STAR_RADIUS: f64 = 2.588e10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    /// Total arclength of a seed line.
    pub arclength: f64,
    pub steps: usize,
    pub order: TraceOrder,
}

impl IntegrationSettings {
    /// Arclength advanced per integration step.
    pub fn step(&self) -> f64 {
        self.arclength / self.steps as f64
    }
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            arclength: 2.0 * DEFAULT_STAR_RADIUS,
            steps: 399,
            order: TraceOrder::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Half-width of the Monte-Carlo seeding box, in length units.
    pub seed_radius: f64,
    /// Overlap tolerance as a multiple of `seed_radius`.
    pub tolerance_multiplier: f64,
    /// Fraction of the shorter line that must match for two segments to overlap.
    pub overlap_fraction: f64,
    /// Number of lines (centerline included) used to estimate the radius profile.
    pub lines_per_structure: usize,
}

impl MergeSettings {
    pub fn overlap_tolerance(&self) -> f64 {
        self.seed_radius * self.tolerance_multiplier
    }

    /// Largest deviation from the centerline a Monte-Carlo line may have.
    pub fn acceptance_radius(&self) -> f64 {
        self.overlap_tolerance() * 1.5
    }
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            seed_radius: 0.02 * DEFAULT_STAR_RADIUS,
            tolerance_multiplier: 5.0,
            overlap_fraction: 0.75,
            lines_per_structure: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub classifier_threshold: f64,
    pub patterns: LoopPatterns,
    /// Runs shorter than this fraction of the line are merged into neighbors.
    pub segmin: f64,
    /// Candidates longer than this fraction of the line are discarded.
    pub segmax: f64,
    /// Extra samples added on each side of a detected candidate.
    pub buffer: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            classifier_threshold: 0.0,
            patterns: LoopPatterns::default(),
            segmin: 0.0,
            segmax: 1.0,
            buffer: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TubeSettings {
    /// Vertices per tube cross-section.
    pub segments: usize,
}

impl Default for TubeSettings {
    fn default() -> Self {
        Self { segments: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub star_radius: f64,
    pub integration: IntegrationSettings,
    pub merge: MergeSettings,
    pub detection: DetectionSettings,
    pub tube: TubeSettings,
    /// Upper bound on snapshots processed concurrently.
    pub max_workers: usize,
}

impl LoopSettings {
    /// Settings with every length scaled to a star of the given radius.
    pub fn for_star(star_radius: f64) -> Self {
        let scale = star_radius / DEFAULT_STAR_RADIUS;
        let integration = IntegrationSettings::default();
        let merge = MergeSettings::default();
        Self {
            star_radius,
            integration: IntegrationSettings {
                arclength: integration.arclength * scale,
                ..integration
            },
            merge: MergeSettings {
                seed_radius: merge.seed_radius * scale,
                ..merge
            },
            detection: DetectionSettings::default(),
            tube: TubeSettings::default(),
            max_workers: 12,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.star_radius.is_finite() && self.star_radius > 0.0) {
            bail!("star_radius must be positive and finite.");
        }
        if !(self.integration.arclength.is_finite() && self.integration.arclength > 0.0) {
            bail!("Integration arclength must be positive and finite.");
        }
        if self.integration.steps == 0 {
            bail!("Integration requires at least one step.");
        }
        if !(self.merge.seed_radius.is_finite() && self.merge.seed_radius > 0.0) {
            bail!("seed_radius must be positive and finite.");
        }
        if !(self.merge.tolerance_multiplier.is_finite() && self.merge.tolerance_multiplier > 0.0)
        {
            bail!("tolerance_multiplier must be positive and finite.");
        }
        if !(0.0..=1.0).contains(&self.merge.overlap_fraction) {
            bail!(
                "overlap_fraction must lie in [0, 1], got {}.",
                self.merge.overlap_fraction
            );
        }
        if self.merge.lines_per_structure < 2 {
            bail!("lines_per_structure must be at least 2 to estimate a radius.");
        }
        let detection = &self.detection;
        if !(0.0..=1.0).contains(&detection.segmin) {
            bail!("segmin must lie in [0, 1], got {}.", detection.segmin);
        }
        if !(detection.segmax > 0.0 && detection.segmax <= 1.0) {
            bail!("segmax must lie in (0, 1], got {}.", detection.segmax);
        }
        detection.patterns.validate()?;
        if self.tube.segments < 3 {
            bail!("Tube cross-sections need at least 3 segments.");
        }
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1.");
        }
        Ok(())
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::for_star(DEFAULT_STAR_RADIUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn defaults_validate_and_derive_step() {
        let settings = LoopSettings::default();
        settings.validate().expect("defaults should validate");
        let expected = 2.0 * DEFAULT_STAR_RADIUS / 399.0;
        assert!((settings.integration.step() - expected).abs() < 1e-6);
        assert!(
            (settings.merge.overlap_tolerance() - 5.0 * 0.02 * DEFAULT_STAR_RADIUS).abs() < 1e-3
        );
    }

    #[test]
    fn for_star_scales_lengths() {
        let settings = LoopSettings::for_star(1.0);
        assert!((settings.integration.arclength - 2.0).abs() < 1e-12);
        assert!((settings.merge.seed_radius - 0.02).abs() < 1e-12);
        assert_eq!(settings.integration.steps, 399);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut settings = LoopSettings::for_star(1.0);
        settings.integration.steps = 0;
        assert_err_contains(settings.validate(), "at least one step");

        let mut settings = LoopSettings::for_star(1.0);
        settings.merge.overlap_fraction = 1.5;
        assert_err_contains(settings.validate(), "overlap_fraction");

        let mut settings = LoopSettings::for_star(1.0);
        settings.detection.segmax = 0.0;
        assert_err_contains(settings.validate(), "segmax");

        let mut settings = LoopSettings::for_star(1.0);
        settings.detection.patterns.center_only = vec![vec![0, 1]];
        assert_err_contains(settings.validate(), "at least 3 labels");
    }
}
