//! Session output directory management.
//!
//! A session groups every experiment of one benchmark process under a single
//! root directory named by the process start time. Each experiment receives
//! its own `{identifier}{timestamp}` subdirectory with `patterns/` and
//! `captures/` folders.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Name of the per-experiment pattern folder.
pub const PATTERNS_DIR: &str = "patterns";
/// Name of the per-experiment capture folder.
pub const CAPTURES_DIR: &str = "captures";

/// Shared output location for one benchmark process.
#[derive(Debug, Clone)]
pub struct SessionContext {
    root: PathBuf,
    started: Instant,
}

impl SessionContext {
    /// Create the session root under `parent`.
    pub fn create(parent: &Path) -> Result<Self> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut root = parent.join(stamp.to_string());
        let mut suffix = 1;
        while root.exists() {
            root = parent.join(format!("{}-{}", stamp, suffix));
            suffix += 1;
        }

        std::fs::create_dir_all(&root)?;
        log::info!("Session directory: {}", root.display());

        Ok(Self {
            root,
            started: Instant::now(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory for an experiment, including its pattern and
    /// capture folders.
    pub fn experiment_dir(&self, identifier: &str) -> Result<PathBuf> {
        let mut stamp = self.started.elapsed().as_micros();
        let mut path = self.root.join(format!("{}{}", identifier, stamp));
        while path.exists() {
            stamp += 1;
            path = self.root.join(format!("{}{}", identifier, stamp));
        }

        std::fs::create_dir_all(path.join(PATTERNS_DIR))?;
        std::fs::create_dir_all(path.join(CAPTURES_DIR))?;

        Ok(path)
    }

    /// Location of a session-level artifact such as a comparison report.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// File name of the pattern projected at `iteration`.
pub fn pattern_file(experiment_dir: &Path, iteration: usize) -> PathBuf {
    experiment_dir
        .join(PATTERNS_DIR)
        .join(format!("pattern_{}.png", iteration))
}

/// File name of the (undistorted) capture taken at `iteration`.
pub fn capture_file(experiment_dir: &Path, iteration: usize) -> PathBuf {
    experiment_dir
        .join(CAPTURES_DIR)
        .join(format!("capture_{}.png", iteration))
}
