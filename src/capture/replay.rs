//! Replay of captures recorded by an earlier run.

use std::path::{Path, PathBuf};

use super::{CaptureKind, CaptureSource, DeviceState, Frame};
use crate::error::Result;
use crate::experiment::RunContext;

/// Reads `{root}/{solver}/capture_{iteration}.png` instead of projecting.
pub struct ReplaySource {
    device: DeviceState,
    root: PathBuf,
}

impl ReplaySource {
    pub fn new(device: DeviceState, root: impl Into<PathBuf>) -> Self {
        Self {
            device,
            root: root.into(),
        }
    }

    /// Recorded capture for a solver and iteration.
    pub fn capture_path(&self, solver: &str, iteration: usize) -> PathBuf {
        replay_path(&self.root, solver, iteration)
    }
}

fn replay_path(root: &Path, solver: &str, iteration: usize) -> PathBuf {
    root.join(solver).join(format!("capture_{}.png", iteration))
}

impl CaptureSource for ReplaySource {
    fn kind(&self) -> CaptureKind {
        CaptureKind::FileReplay
    }

    fn device(&self) -> &DeviceState {
        &self.device
    }

    fn device_mut(&mut self) -> &mut DeviceState {
        &mut self.device
    }

    fn project_and_capture(
        &mut self,
        _pattern: &Frame,
        ctx: &RunContext<'_>,
    ) -> Result<Option<Frame>> {
        let path = self.capture_path(ctx.solver, ctx.iteration);
        log::debug!("Reading replay capture {}", path.display());

        if !path.exists() {
            log::warn!("Replay capture {} does not exist", path.display());
            return Ok(None);
        }

        Ok(Some(image::open(&path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InfrastructureSetup;

    #[test]
    fn test_missing_frame_is_soft_failure() {
        let root = std::env::temp_dir().join(format!("sl_replay_{}", std::process::id()));
        let solver_dir = root.join("gray");
        std::fs::create_dir_all(&solver_dir).unwrap();
        Frame::new_luma8(5, 3)
            .save(solver_dir.join("capture_0.png"))
            .unwrap();

        let setup = InfrastructureSetup::default();
        let mut source = ReplaySource::new(DeviceState::new("replay", setup), &root);

        let ctx = |iteration| RunContext {
            experiment: "replaygray",
            solver: "gray",
            iteration,
            setup: &setup,
            path: &root,
        };

        let first = source
            .project_and_capture(&Frame::new_luma8(1, 1), &ctx(0))
            .unwrap();
        assert_eq!(first.map(|f| (f.width(), f.height())), Some((5, 3)));

        let second = source
            .project_and_capture(&Frame::new_luma8(1, 1), &ctx(1))
            .unwrap();
        assert!(second.is_none());

        std::fs::remove_dir_all(&root).ok();
    }
}
