use super::{require_completed, Comparison, ComparisonStrategy};
use crate::error::Result;
use crate::experiment::Experiment;
use crate::session::SessionContext;

/// Difference of total timed-phase duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeedComparison;

impl ComparisonStrategy for SpeedComparison {
    fn name(&self) -> &str {
        "speed"
    }

    fn compare(
        &self,
        reference: &Experiment,
        candidate: &Experiment,
        _session: &SessionContext,
    ) -> Result<Comparison> {
        require_completed(reference, candidate)?;
        let reference_total = reference.require_speed()?.total_elapsed();
        let candidate_total = candidate.require_speed()?.total_elapsed();

        let difference = reference_total.as_secs_f64() - candidate_total.as_secs_f64();
        log::info!(
            "Speed {} vs {}: {:?} vs {:?}, difference {:.6}s",
            reference.identifier(),
            candidate.identifier(),
            reference_total,
            candidate_total,
            difference
        );

        Ok(Comparison::Speed {
            reference: reference_total,
            candidate: candidate_total,
            difference,
        })
    }
}
