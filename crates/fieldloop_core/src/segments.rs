use std::ops::Range;

use anyhow::{bail, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::DetectionSettings;

/// Run sequences that identify a loop.
///
/// A `full` pattern marks every sample of the matching runs as part of the
/// loop. A `center_only` pattern marks only the runs strictly between its first
/// and last run, so `[0, 1, 0]` selects the `1` run when it is flanked by `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopPatterns {
    pub full: Vec<Vec<usize>>,
    pub center_only: Vec<Vec<usize>>,
}

impl LoopPatterns {
    pub fn validate(&self) -> Result<()> {
        if let Some(index) = self.full.iter().position(|pattern| pattern.is_empty()) {
            bail!("Full loop pattern {index} is empty.");
        }
        if let Some(index) = self
            .center_only
            .iter()
            .position(|pattern| pattern.len() < 3)
        {
            bail!(
                "Center-only loop pattern {index} must have at least 3 labels, got {}.",
                self.center_only[index].len()
            );
        }
        Ok(())
    }
}

/// Run-length encoding of a label sequence.
///
/// `starts` holds the first sample of each run followed by a sentinel equal to
/// the sequence length, so run `k` covers `starts[k]..starts[k + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runs {
    pub starts: Vec<usize>,
    pub labels: Vec<usize>,
}

impl Runs {
    pub fn encode(labels: &[usize]) -> Self {
        let mut starts = Vec::new();
        let mut runs: Vec<usize> = Vec::new();
        for (i, &label) in labels.iter().enumerate() {
            if runs.last() != Some(&label) {
                starts.push(i);
                runs.push(label);
            }
        }
        starts.push(labels.len());
        Self {
            starts,
            labels: runs,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn span(&self, k: usize) -> usize {
        self.starts[k + 1] - self.starts[k]
    }

    /// Merges every run shorter than `min_len` samples into its neighbors.
    ///
    /// The first run folds into the next one and the last run into the one
    /// before it. An inner run flanked by equal labels joins both neighbors
    /// into a single run; otherwise it is split evenly between them. After a
    /// merge the same position is examined again.
    pub fn absorb_short_runs(&mut self, min_len: f64) {
        let mut k = 0;
        while self.labels.len() > 1 && k < self.labels.len() {
            if self.span(k) as f64 >= min_len {
                k += 1;
                continue;
            }
            let last = self.labels.len() - 1;
            if k == 0 {
                self.starts.remove(1);
                self.labels.remove(0);
            } else if k == last {
                self.starts.remove(k);
                self.labels.pop();
            } else if self.labels[k - 1] == self.labels[k + 1] {
                self.starts.drain(k..k + 2);
                self.labels.drain(k..k + 2);
            } else {
                let mid = (self.starts[k] + self.starts[k + 1]) / 2;
                self.starts.remove(k);
                self.starts[k] = mid;
                self.labels.remove(k);
            }
        }
    }

    fn matches_at(&self, k: usize, pattern: &[usize]) -> bool {
        self.labels[k..k + pattern.len()] == *pattern
    }
}

/// Returns the sample ranges of every loop candidate in `labels`.
///
/// Full patterns are scanned before center-only ones, each from left to
/// right, so overlapping candidates may be reported more than once.
pub fn detect_loops(labels: &[usize], settings: &DetectionSettings) -> Vec<Range<usize>> {
    let n = labels.len();
    let mut runs = Runs::encode(labels);
    if settings.segmin > 0.0 {
        runs.absorb_short_runs(settings.segmin * n as f64);
    }

    let max_span = settings.segmax * n as f64;
    let buffer = settings.buffer;
    let window = |lo: usize, hi: usize| -> Option<Range<usize>> {
        let lo = lo.saturating_sub(buffer);
        let hi = (hi + buffer).min(n);
        (hi > lo && (hi - lo) as f64 <= max_span).then_some(lo..hi)
    };

    let mut loops = Vec::new();
    for pattern in &settings.patterns.full {
        if pattern.is_empty() || pattern.len() > runs.len() {
            continue;
        }
        for k in 0..=runs.len() - pattern.len() {
            if runs.matches_at(k, pattern) {
                loops.extend(window(runs.starts[k], runs.starts[k + pattern.len()]));
            }
        }
    }
    for pattern in &settings.patterns.center_only {
        if pattern.len() < 3 || pattern.len() > runs.len() {
            continue;
        }
        for k in 0..=runs.len() - pattern.len() {
            if runs.matches_at(k, pattern) {
                loops.extend(window(
                    runs.starts[k + 1],
                    runs.starts[k + pattern.len() - 1],
                ));
            }
        }
    }
    debug!(
        "Found {} loop candidates in {} runs over {n} samples",
        loops.len(),
        runs.len()
    );
    loops
}
