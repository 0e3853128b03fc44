//! Simulated capture through an external scene renderer.
//!
//! The renderer is invoked synchronously once per pattern:
//!
//! ```text
//! <renderer> -b -P <script> -- <pattern> <capture> <scene output> <camera width>
//!     <camera height> <camera hfov> <projector hfov> <separation> <save scene> <scene descriptor>
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{format_general, CaptureKind, CaptureSource, DeviceState, Frame};
use crate::error::{BenchmarkError, Result};
use crate::experiment::RunContext;

const DEFAULT_RENDERER: &str = "blender";

/// Capture source backed by an external rendering process.
pub struct VirtualRenderSource {
    device: DeviceState,
    /// Renderer executable; looked up in PATH when `None`.
    renderer: Option<PathBuf>,
    script: PathBuf,
    scene: PathBuf,
    calibration_scene: PathBuf,
    save_scene: bool,
    calibrating: bool,
    temp_dir: PathBuf,
}

impl VirtualRenderSource {
    pub fn new(
        device: DeviceState,
        script: impl Into<PathBuf>,
        scene: impl Into<PathBuf>,
        calibration_scene: impl Into<PathBuf>,
    ) -> Self {
        Self {
            device,
            renderer: None,
            script: script.into(),
            scene: scene.into(),
            calibration_scene: calibration_scene.into(),
            save_scene: false,
            calibrating: false,
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_renderer(mut self, renderer: impl Into<PathBuf>) -> Self {
        self.renderer = Some(renderer.into());
        self
    }

    pub fn with_save_scene(mut self, save_scene: bool) -> Self {
        self.save_scene = save_scene;
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Scene descriptor in use; the calibration scene while calibrating.
    pub fn scene_descriptor(&self) -> &Path {
        if self.calibrating {
            &self.calibration_scene
        } else {
            &self.scene
        }
    }

    fn find_renderer(&self) -> Result<PathBuf> {
        if let Some(path) = &self.renderer {
            return Ok(path.clone());
        }
        which::which(DEFAULT_RENDERER).map_err(|_| BenchmarkError::RendererNotFound)
    }

    /// Full argument list passed to the renderer.
    pub fn renderer_args(&self, pattern: &Path, capture: &Path, output: &Path) -> Vec<OsString> {
        let setup = &self.device.setup;

        let mut args: Vec<OsString> = vec![
            "-b".into(),
            "-P".into(),
            self.script.clone().into_os_string(),
            "--".into(),
        ];
        args.push(pattern.as_os_str().to_owned());
        args.push(capture.as_os_str().to_owned());
        args.push(output.as_os_str().to_owned());
        args.push(setup.camera.resolution.width.to_string().into());
        args.push(setup.camera.resolution.height.to_string().into());
        args.push(format_general(setup.camera.horizontal_fov).into());
        args.push(format_general(setup.projector.horizontal_fov).into());
        args.push(format_general(setup.separation).into());
        args.push(if self.save_scene { "true" } else { "false" }.into());
        args.push(self.scene_descriptor().as_os_str().to_owned());
        args
    }
}

impl CaptureSource for VirtualRenderSource {
    fn kind(&self) -> CaptureKind {
        CaptureKind::VirtualRendered
    }

    fn device(&self) -> &DeviceState {
        &self.device
    }

    fn device_mut(&mut self) -> &mut DeviceState {
        &mut self.device
    }

    fn set_calibrating(&mut self, calibrating: bool) {
        self.calibrating = calibrating;
    }

    fn project_and_capture(
        &mut self,
        pattern: &Frame,
        ctx: &RunContext<'_>,
    ) -> Result<Option<Frame>> {
        let program = self.find_renderer()?;

        let tag = std::process::id();
        let pattern_path = self.temp_dir.join(format!("render_tmp_pattern_{}.png", tag));
        let capture_path = self.temp_dir.join(format!("render_tmp_capture_{}.png", tag));
        let scene_path = ctx
            .path
            .join(format!("virtual_scene_{}.blend", ctx.iteration));

        pattern.save(&pattern_path)?;

        let args = self.renderer_args(&pattern_path, &capture_path, &scene_path);
        log::debug!("Renderer command: {} {:?}", program.display(), args);

        let status = Command::new(&program).args(&args).status().map_err(|source| {
            BenchmarkError::RendererLaunch {
                program: program.display().to_string(),
                source,
            }
        });

        let result = match status {
            Ok(status) if status.success() => image::open(&capture_path)
                .map(Some)
                .map_err(BenchmarkError::from),
            Ok(status) => Err(BenchmarkError::RendererExit(status.code().unwrap_or(-1))),
            Err(e) => Err(e),
        };

        let _ = std::fs::remove_file(&pattern_path);
        let _ = std::fs::remove_file(&capture_path);

        result
    }
}
