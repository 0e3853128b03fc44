use super::{require_completed, shared_domain, Comparison, ComparisonStrategy};
use crate::error::Result;
use crate::experiment::Experiment;
use crate::session::SessionContext;

/// Difference of valued depth cells over the shared domain.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResolutionComparison;

impl ComparisonStrategy for ResolutionComparison {
    fn name(&self) -> &str {
        "resolution"
    }

    fn compare(
        &self,
        reference: &Experiment,
        candidate: &Experiment,
        _session: &SessionContext,
    ) -> Result<Comparison> {
        require_completed(reference, candidate)?;
        let (width, height) = shared_domain(reference, candidate)?;

        let reference_count = reference.require_depth()?.valued_count_in(width, height);
        let candidate_count = candidate.require_depth()?.valued_count_in(width, height);
        let difference = reference_count as i64 - candidate_count as i64;

        log::info!(
            "Resolution {} vs {}: {} vs {} valued cell(s), difference {}",
            reference.identifier(),
            candidate.identifier(),
            reference_count,
            candidate_count,
            difference
        );

        Ok(Comparison::Resolution {
            reference_count,
            candidate_count,
            difference,
        })
    }
}
