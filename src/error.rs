//! Error type shared by the benchmark library.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running or comparing experiments.
#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Failed to parse calibration file {path}: {message}")]
    CalibrationParse { path: PathBuf, message: String },
    #[error("Failed to parse depth file {path}: {message}")]
    DepthFileParse { path: PathBuf, message: String },
    #[error("Failed to write calibration file: {0}")]
    CalibrationWrite(String),
    #[error("Cannot continue without calibration completed")]
    CalibrationDeclined,
    #[error("Calibration failed: {0}")]
    CalibrationFailed(String),
    #[error("Could not open capture device: {0}")]
    DeviceOpen(String),
    #[error("Could not launch renderer {program}: {source}")]
    RendererLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Renderer not found. Please ensure the renderer executable can be found in the current path")]
    RendererNotFound,
    #[error("Renderer exited with status {0}")]
    RendererExit(i32),
    #[error("{0} is already bound to another running experiment")]
    AlreadyBound(&'static str),
    #[error("Invalid experiment state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Comparison requires matching projector width and camera height (reference {reference:?}, candidate {candidate:?})")]
    DomainMismatch {
        reference: (u32, u32),
        candidate: (u32, u32),
    },
    #[error("Experiment {experiment} does not record {capability} data")]
    MissingCapability {
        experiment: String,
        capability: &'static str,
    },
    #[error("Accuracy histogram over [{min}, {max}] at bin width {bin_width} exceeds {limit} bins")]
    HistogramTooWide {
        min: f64,
        max: f64,
        bin_width: f64,
        limit: usize,
    },
    #[error("Experiment {0} has not completed its run")]
    NotCompleted(String),
}

pub type Result<T> = std::result::Result<T, BenchmarkError>;
