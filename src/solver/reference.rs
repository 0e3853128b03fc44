//! Ground-truth solver backed by a ray-cast depth file.

use std::fs;
use std::path::{Path, PathBuf};

use super::{PatternSolver, ResultSink};
use crate::capture::Frame;
use crate::error::{BenchmarkError, Result};
use crate::experiment::{DepthSample, RunContext};

/// Reads precomputed `xPixel yPixel z` lines instead of decoding captures.
///
/// It runs zero iterations; every finite sample in the file is stored during
/// post-iterations processing.
pub struct RaycastReferenceSolver {
    identifier: String,
    depth_file: PathBuf,
    pattern_width: u32,
}

impl RaycastReferenceSolver {
    pub fn new(identifier: impl Into<String>, depth_file: impl Into<PathBuf>, pattern_width: u32) -> Self {
        Self {
            identifier: identifier.into(),
            depth_file: depth_file.into(),
            pattern_width,
        }
    }

    pub fn depth_file(&self) -> &Path {
        &self.depth_file
    }

    /// Parse the depth file. Blank lines and lines starting with `#` are skipped.
    pub fn read_samples(&self) -> Result<Vec<DepthSample>> {
        let contents = fs::read_to_string(&self.depth_file)?;
        parse_samples(&contents).map_err(|message| BenchmarkError::DepthFileParse {
            path: self.depth_file.clone(),
            message,
        })
    }
}

fn parse_samples(contents: &str) -> std::result::Result<Vec<DepthSample>, String> {
    let mut samples = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(format!("line {}: expected 3 fields, got {}", line_no + 1, fields.len()));
        }

        let x: u32 = fields[0]
            .parse()
            .map_err(|e| format!("line {}: bad x: {}", line_no + 1, e))?;
        let y: u32 = fields[1]
            .parse()
            .map_err(|e| format!("line {}: bad y: {}", line_no + 1, e))?;
        let z: f64 = fields[2]
            .parse()
            .map_err(|e| format!("line {}: bad z: {}", line_no + 1, e))?;

        if z.is_finite() {
            samples.push(DepthSample::new(x, y, z));
        }
    }

    Ok(samples)
}

impl PatternSolver for RaycastReferenceSolver {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn pattern_width(&self) -> u32 {
        self.pattern_width
    }

    fn has_more_iterations(&self, _ctx: &RunContext<'_>) -> bool {
        false
    }

    fn generate_pattern(&mut self, ctx: &RunContext<'_>) -> Result<Frame> {
        let resolution = ctx.setup.projector.resolution;
        Ok(Frame::new_luma8(resolution.width, resolution.height))
    }

    fn process_capture(&mut self, _capture: Option<&Frame>, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }

    fn solve_correspondence(&self, _x_pattern: u32, _y: u32) -> f64 {
        f64::NAN
    }

    fn post_iterations_process(
        &mut self,
        ctx: &RunContext<'_>,
        results: &mut dyn ResultSink,
    ) -> Result<()> {
        let samples = self.read_samples()?;
        log::info!(
            "{}: loaded {} reference sample(s) from {}",
            ctx.experiment,
            samples.len(),
            self.depth_file.display()
        );
        for sample in samples {
            results.store_sample(sample);
        }
        Ok(())
    }
}
