//! Comparison strategies between a reference experiment and a candidate.

mod accuracy;
mod resolution;
mod speed;

pub use accuracy::{AccuracyComparison, Histogram, MAX_HISTOGRAM_BINS};
pub use resolution::ResolutionComparison;
pub use speed::SpeedComparison;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BenchmarkError, Result};
use crate::experiment::Experiment;
use crate::session::SessionContext;

/// Width of one accuracy histogram bin, in displacement units.
pub const DEFAULT_BIN_WIDTH: f64 = 0.001;

/// Outcome of one strategy applied to one (reference, candidate) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Speed {
        reference: Duration,
        candidate: Duration,
        /// Reference minus candidate, in seconds.
        difference: f64,
    },
    Resolution {
        reference_count: usize,
        candidate_count: usize,
        difference: i64,
    },
    Accuracy {
        /// Absent when no cell was valued in both experiments.
        histogram: Option<Histogram>,
        path: Option<PathBuf>,
    },
}

/// Compares a candidate experiment against the reference.
pub trait ComparisonStrategy {
    fn name(&self) -> &str;

    /// Both experiments must have completed their run.
    fn compare(
        &self,
        reference: &Experiment,
        candidate: &Experiment,
        session: &SessionContext,
    ) -> Result<Comparison>;
}

/// Shared (projector width, camera height) domain of two experiments.
pub(crate) fn shared_domain(reference: &Experiment, candidate: &Experiment) -> Result<(u32, u32)> {
    let domain = |e: &Experiment| {
        (
            e.setup().projector.resolution.width,
            e.setup().camera.resolution.height,
        )
    };

    let reference_domain = domain(reference);
    let candidate_domain = domain(candidate);
    if reference_domain != candidate_domain {
        return Err(BenchmarkError::DomainMismatch {
            reference: reference_domain,
            candidate: candidate_domain,
        });
    }
    Ok(reference_domain)
}

pub(crate) fn require_completed(reference: &Experiment, candidate: &Experiment) -> Result<()> {
    reference.require_completed()?;
    candidate.require_completed()
}
