use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{require_completed, shared_domain, Comparison, ComparisonStrategy, DEFAULT_BIN_WIDTH};
use crate::error::{BenchmarkError, Result};
use crate::experiment::Experiment;
use crate::session::SessionContext;

/// Upper bound on the number of histogram bins.
pub const MAX_HISTOGRAM_BINS: usize = 1_000_000;

/// Normalized distribution of signed depth differences.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub bin_width: f64,
    pub min: f64,
    pub max: f64,
    /// Number of differences binned.
    pub samples: usize,
    /// `(bin lower bound, probability)`, ordered by bin index.
    pub bins: Vec<(f64, f64)>,
}

impl Histogram {
    /// Bin `differences` into `bin_width` wide bins spanning `[min, max]`.
    ///
    /// Returns `None` when there is nothing to bin, and an error when the
    /// range would need more than [`MAX_HISTOGRAM_BINS`] bins.
    pub fn from_differences(differences: &[f64], bin_width: f64) -> Result<Option<Self>> {
        if differences.is_empty() || !(bin_width > 0.0) {
            return Ok(None);
        }

        let (min, max) = differences
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &d| {
                (lo.min(d), hi.max(d))
            });

        let span = ((max - min) / bin_width).floor();
        // NaN or infinite spans fail this check too.
        if !(span < MAX_HISTOGRAM_BINS as f64) {
            return Err(BenchmarkError::HistogramTooWide {
                min,
                max,
                bin_width,
                limit: MAX_HISTOGRAM_BINS,
            });
        }
        let bin_count = span as usize + 1;
        let mut counts = vec![0usize; bin_count];
        for &d in differences {
            let index = (((d - min) / bin_width).floor() as usize).min(bin_count - 1);
            counts[index] += 1;
        }

        let total = differences.len() as f64;
        let bins = counts
            .iter()
            .enumerate()
            .map(|(index, &count)| (min + index as f64 * bin_width, count as f64 / total))
            .collect();

        Ok(Some(Self {
            bin_width,
            min,
            max,
            samples: differences.len(),
            bins,
        }))
    }

    pub fn total_probability(&self) -> f64 {
        self.bins.iter().map(|(_, p)| p).sum()
    }

    /// Write `lower,probability` rows.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (lower, probability) in &self.bins {
            writeln!(writer, "{},{}", lower, probability)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Histogram of reference minus candidate depth over jointly valued cells.
#[derive(Debug, Clone, Copy)]
pub struct AccuracyComparison {
    bin_width: f64,
}

impl AccuracyComparison {
    pub fn new(bin_width: f64) -> Self {
        Self { bin_width }
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }
}

impl Default for AccuracyComparison {
    fn default() -> Self {
        Self::new(DEFAULT_BIN_WIDTH)
    }
}

impl ComparisonStrategy for AccuracyComparison {
    fn name(&self) -> &str {
        "accuracy"
    }

    fn compare(
        &self,
        reference: &Experiment,
        candidate: &Experiment,
        session: &SessionContext,
    ) -> Result<Comparison> {
        require_completed(reference, candidate)?;
        let (width, height) = shared_domain(reference, candidate)?;
        let reference_depth = reference.require_depth()?;
        let candidate_depth = candidate.require_depth()?;

        let mut differences = Vec::new();
        for x in 0..width {
            for y in 0..height {
                if let (Some(r), Some(c)) = (
                    reference_depth.get_depth_data(x, y),
                    candidate_depth.get_depth_data(x, y),
                ) {
                    differences.push(r - c);
                }
            }
        }

        let Some(histogram) = Histogram::from_differences(&differences, self.bin_width)? else {
            log::warn!(
                "Accuracy {} vs {}: no jointly valued cells, no histogram written",
                reference.identifier(),
                candidate.identifier()
            );
            return Ok(Comparison::Accuracy {
                histogram: None,
                path: None,
            });
        };

        let path = session.artifact_path(&format!(
            "{}_vs_{}_accuracy_histogram.csv",
            reference.identifier(),
            candidate.identifier()
        ));
        histogram.write_csv(&path)?;

        log::info!(
            "Accuracy {} vs {}: {} sample(s) in {} bin(s), range [{}, {}], written to {}",
            reference.identifier(),
            candidate.identifier(),
            histogram.samples,
            histogram.bins.len(),
            histogram.min,
            histogram.max,
            path.display()
        );

        Ok(Comparison::Accuracy {
            histogram: Some(histogram),
            path: Some(path),
        })
    }
}
