//! Benchmark description files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::InfrastructureSetup;
use crate::error::{BenchmarkError, Result};
use crate::experiment::ExperimentKind;
use crate::metric::DEFAULT_BIN_WIDTH;

/// What to do when no cached calibration exists for an infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsentPolicy {
    /// Ask the operator on stdin.
    #[default]
    Prompt,
    /// Calibrate without asking.
    Accept,
    /// Refuse to calibrate (fatal when no cache exists).
    Decline,
}

/// Capture source variant parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SourceEntry", into = "SourceEntry")]
pub enum SourceConfig {
    /// Live projector and camera.
    Physical {
        camera_index: u32,
        settle_ms: u64,
        /// File the current pattern is written to for the full-screen viewer.
        display_path: PathBuf,
    },
    /// Scene rendered by an external process.
    Virtual {
        /// Renderer executable, looked up in PATH when absent.
        renderer: Option<PathBuf>,
        script: PathBuf,
        scene: PathBuf,
        calibration_scene: PathBuf,
        save_scene: bool,
    },
    /// Previously recorded captures.
    Replay { root: PathBuf },
}

fn default_settle_ms() -> u64 {
    500
}

/// A named capture source with its device geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    pub name: String,
    pub setup: InfrastructureSetup,
    pub source: SourceConfig,
}

/// Pattern solver parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SolverEntry", into = "SolverEntry")]
pub enum SolverConfig {
    GrayCode {
        name: String,
        /// Number of pattern columns, defaults to the projector width.
        pattern_width: Option<u32>,
        /// Minimum positive/inverted intensity difference for a valid bit.
        contrast_threshold: f32,
    },
    Reference {
        name: String,
        depth_file: PathBuf,
    },
}

fn default_contrast_threshold() -> f32 {
    0.1
}

impl SolverConfig {
    pub fn name(&self) -> &str {
        match self {
            SolverConfig::GrayCode { name, .. } | SolverConfig::Reference { name, .. } => name,
        }
    }
}

/// One experiment: which infrastructure drives which solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub infrastructure: String,
    pub solver: String,
    #[serde(default)]
    pub kind: ExperimentKind,
}

/// Comparison strategies to apply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "MetricEntry", into = "MetricEntry")]
pub enum MetricConfig {
    Speed,
    Resolution,
    Accuracy { bin_width: f64 },
}

// Flat `type`-keyed records backing the variant enums above. quick-xml
// cannot read internally tagged enums.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SourceKind {
    Physical,
    Virtual,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceEntry {
    #[serde(rename = "type", alias = "@type")]
    kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    camera_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    settle_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renderer: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scene: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    calibration_scene: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    save_scene: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<PathBuf>,
}

impl SourceEntry {
    fn empty(kind: SourceKind) -> Self {
        Self {
            kind,
            camera_index: None,
            settle_ms: None,
            display_path: None,
            renderer: None,
            script: None,
            scene: None,
            calibration_scene: None,
            save_scene: None,
            root: None,
        }
    }
}

fn required<T>(value: Option<T>, source: &str, field: &str) -> std::result::Result<T, String> {
    value.ok_or_else(|| format!("{} source requires `{}`", source, field))
}

impl TryFrom<SourceEntry> for SourceConfig {
    type Error = String;

    fn try_from(entry: SourceEntry) -> std::result::Result<Self, Self::Error> {
        Ok(match entry.kind {
            SourceKind::Physical => SourceConfig::Physical {
                camera_index: entry.camera_index.unwrap_or(0),
                settle_ms: entry.settle_ms.unwrap_or_else(default_settle_ms),
                display_path: required(entry.display_path, "physical", "display_path")?,
            },
            SourceKind::Virtual => SourceConfig::Virtual {
                renderer: entry.renderer,
                script: required(entry.script, "virtual", "script")?,
                scene: required(entry.scene, "virtual", "scene")?,
                calibration_scene: required(entry.calibration_scene, "virtual", "calibration_scene")?,
                save_scene: entry.save_scene.unwrap_or(false),
            },
            SourceKind::Replay => SourceConfig::Replay {
                root: required(entry.root, "replay", "root")?,
            },
        })
    }
}

impl From<SourceConfig> for SourceEntry {
    fn from(config: SourceConfig) -> Self {
        match config {
            SourceConfig::Physical {
                camera_index,
                settle_ms,
                display_path,
            } => SourceEntry {
                camera_index: Some(camera_index),
                settle_ms: Some(settle_ms),
                display_path: Some(display_path),
                ..SourceEntry::empty(SourceKind::Physical)
            },
            SourceConfig::Virtual {
                renderer,
                script,
                scene,
                calibration_scene,
                save_scene,
            } => SourceEntry {
                renderer,
                script: Some(script),
                scene: Some(scene),
                calibration_scene: Some(calibration_scene),
                save_scene: Some(save_scene),
                ..SourceEntry::empty(SourceKind::Virtual)
            },
            SourceConfig::Replay { root } => SourceEntry {
                root: Some(root),
                ..SourceEntry::empty(SourceKind::Replay)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SolverKind {
    GrayCode,
    Reference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SolverEntry {
    #[serde(rename = "type", alias = "@type")]
    kind: SolverKind,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contrast_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    depth_file: Option<PathBuf>,
}

impl TryFrom<SolverEntry> for SolverConfig {
    type Error = String;

    fn try_from(entry: SolverEntry) -> std::result::Result<Self, Self::Error> {
        Ok(match entry.kind {
            SolverKind::GrayCode => SolverConfig::GrayCode {
                name: entry.name,
                pattern_width: entry.pattern_width,
                contrast_threshold: entry
                    .contrast_threshold
                    .unwrap_or_else(default_contrast_threshold),
            },
            SolverKind::Reference => SolverConfig::Reference {
                depth_file: entry
                    .depth_file
                    .ok_or_else(|| format!("reference solver {} requires `depth_file`", entry.name))?,
                name: entry.name,
            },
        })
    }
}

impl From<SolverConfig> for SolverEntry {
    fn from(config: SolverConfig) -> Self {
        match config {
            SolverConfig::GrayCode {
                name,
                pattern_width,
                contrast_threshold,
            } => SolverEntry {
                kind: SolverKind::GrayCode,
                name,
                pattern_width,
                contrast_threshold: Some(contrast_threshold),
                depth_file: None,
            },
            SolverConfig::Reference { name, depth_file } => SolverEntry {
                kind: SolverKind::Reference,
                name,
                pattern_width: None,
                contrast_threshold: None,
                depth_file: Some(depth_file),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MetricKind {
    Speed,
    Resolution,
    Accuracy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MetricEntry {
    #[serde(rename = "type", alias = "@type")]
    kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bin_width: Option<f64>,
}

impl From<MetricEntry> for MetricConfig {
    fn from(entry: MetricEntry) -> Self {
        match entry.kind {
            MetricKind::Speed => MetricConfig::Speed,
            MetricKind::Resolution => MetricConfig::Resolution,
            MetricKind::Accuracy => MetricConfig::Accuracy {
                bin_width: entry.bin_width.unwrap_or(DEFAULT_BIN_WIDTH),
            },
        }
    }
}

impl From<MetricConfig> for MetricEntry {
    fn from(config: MetricConfig) -> Self {
        let (kind, bin_width) = match config {
            MetricConfig::Speed => (MetricKind::Speed, None),
            MetricConfig::Resolution => (MetricKind::Resolution, None),
            MetricConfig::Accuracy { bin_width } => (MetricKind::Accuracy, Some(bin_width)),
        };
        MetricEntry { kind, bin_width }
    }
}

/// Complete benchmark description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Parent directory of the session directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory holding `{hash}.xml` calibration files.
    #[serde(default = "default_output_dir")]
    pub calibration_dir: PathBuf,
    #[serde(default)]
    pub consent: ConsentPolicy,
    pub infrastructures: Vec<InfrastructureConfig>,
    pub solvers: Vec<SolverConfig>,
    pub reference: ExperimentConfig,
    #[serde(default)]
    pub experiments: Vec<ExperimentConfig>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub write_point_clouds: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl BenchmarkConfig {
    pub fn infrastructure(&self, name: &str) -> Result<&InfrastructureConfig> {
        self.infrastructures
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| BenchmarkError::Config(format!("Unknown infrastructure: {}", name)))
    }

    pub fn solver(&self, name: &str) -> Result<&SolverConfig> {
        self.solvers
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| BenchmarkError::Config(format!("Unknown solver: {}", name)))
    }

    /// Check that every experiment references known infrastructures and solvers.
    pub fn validate(&self) -> Result<()> {
        for experiment in std::iter::once(&self.reference).chain(self.experiments.iter()) {
            self.infrastructure(&experiment.infrastructure)?;
            self.solver(&experiment.solver)?;
        }
        for metric in &self.metrics {
            if let MetricConfig::Accuracy { bin_width } = metric {
                if !(*bin_width > 0.0) {
                    return Err(BenchmarkError::Config(format!(
                        "Accuracy bin width must be positive, got {}",
                        bin_width
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Load a benchmark description from JSON or XML.
pub fn load_config(path: &Path) -> Result<BenchmarkConfig> {
    let contents = std::fs::read_to_string(path)?;

    let config: BenchmarkConfig = if path.extension().map(|e| e == "xml").unwrap_or(false) {
        quick_xml::de::from_str(&contents).map_err(|e| BenchmarkError::Config(e.to_string()))?
    } else {
        serde_json::from_str(&contents).map_err(|e| BenchmarkError::Config(e.to_string()))?
    };

    config.validate()?;
    Ok(config)
}
