//! Benchmark registry: one reference experiment, candidate experiments and
//! the comparison strategies applied between them.

use crate::error::Result;
use crate::experiment::Experiment;
use crate::metric::{Comparison, ComparisonStrategy};
use crate::session::SessionContext;

/// Result of one strategy applied to one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub strategy: String,
    pub reference: String,
    pub candidate: String,
    pub comparison: Comparison,
}

/// Runs experiments and compares every candidate against the reference.
pub struct Benchmark {
    reference: Experiment,
    experiments: Vec<Experiment>,
    strategies: Vec<Box<dyn ComparisonStrategy>>,
}

impl Benchmark {
    pub fn new(reference: Experiment) -> Self {
        Self {
            reference,
            experiments: Vec::new(),
            strategies: Vec::new(),
        }
    }

    pub fn add_experiment(&mut self, experiment: Experiment) {
        self.experiments.push(experiment);
    }

    pub fn add_metric(&mut self, strategy: Box<dyn ComparisonStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn reference(&self) -> &Experiment {
        &self.reference
    }

    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Run the reference, then every candidate, in registration order.
    ///
    /// The first failing run aborts the benchmark.
    pub fn run_all(&mut self, session: &SessionContext) -> Result<()> {
        self.reference.run(session)?;
        for experiment in &mut self.experiments {
            experiment.run(session)?;
        }
        Ok(())
    }

    /// Apply every strategy to every candidate.
    ///
    /// A failing pair is logged and skipped; the remaining pairs still run.
    pub fn compare_experiments(&self, session: &SessionContext) -> Vec<ComparisonReport> {
        let mut reports = Vec::with_capacity(self.strategies.len() * self.experiments.len());

        for strategy in &self.strategies {
            for candidate in &self.experiments {
                match strategy.compare(&self.reference, candidate, session) {
                    Ok(comparison) => reports.push(ComparisonReport {
                        strategy: strategy.name().to_string(),
                        reference: self.reference.identifier().to_string(),
                        candidate: candidate.identifier().to_string(),
                        comparison,
                    }),
                    Err(e) => log::error!(
                        "{} comparison of {} against {} skipped: {}",
                        strategy.name(),
                        candidate.identifier(),
                        self.reference.identifier(),
                        e
                    ),
                }
            }
        }

        reports
    }
}

impl std::fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Benchmark")
            .field("reference", &self.reference)
            .field("experiments", &self.experiments)
            .field("strategies", &self.strategy_count())
            .finish()
    }
}
