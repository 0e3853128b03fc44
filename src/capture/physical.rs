//! Live projector/camera capture.

use std::path::PathBuf;
use std::time::Duration;

use super::{CaptureKind, CaptureSource, DeviceState, Frame};
use crate::error::Result;
use crate::experiment::RunContext;

/// Shows a pattern on the projector.
pub trait PatternDisplay {
    fn show(&mut self, pattern: &Frame) -> Result<()>;
}

/// Reads one frame from a camera.
pub trait FrameGrabber {
    fn grab(&mut self) -> Result<Option<Frame>>;
}

/// Writes each pattern to a fixed image file watched by a full-screen viewer
/// running on the projector output.
#[derive(Debug, Clone)]
pub struct ImageFileDisplay {
    path: PathBuf,
}

impl ImageFileDisplay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PatternDisplay for ImageFileDisplay {
    fn show(&mut self, pattern: &Frame) -> Result<()> {
        pattern.save(&self.path)?;
        Ok(())
    }
}

#[cfg(feature = "camera")]
mod nokhwa_impl {
    use super::*;
    use crate::error::BenchmarkError;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;

    /// Camera opened through nokhwa.
    pub struct NokhwaGrabber {
        camera: Camera,
    }

    impl NokhwaGrabber {
        /// Open the camera at `index`; failure is fatal for the run.
        pub fn open(index: u32) -> Result<Self> {
            let requested =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

            let mut camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
                BenchmarkError::DeviceOpen(format!("Could not open camera index {}: {}", index, e))
            })?;
            camera.open_stream().map_err(|e| {
                BenchmarkError::DeviceOpen(format!("Could not start camera {}: {}", index, e))
            })?;

            log::info!(
                "Camera opened: {} ({}x{})",
                camera.info().human_name(),
                camera.resolution().width(),
                camera.resolution().height()
            );

            Ok(Self { camera })
        }
    }

    impl FrameGrabber for NokhwaGrabber {
        fn grab(&mut self) -> Result<Option<Frame>> {
            let frame = match self.camera.frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Failed to capture frame: {}", e);
                    return Ok(None);
                }
            };

            let width = frame.resolution().width();
            let height = frame.resolution().height();
            let decoded = match frame.decode_image::<RgbFormat>() {
                Ok(image) => image.into_raw(),
                Err(e) => {
                    log::warn!("Failed to decode frame: {}", e);
                    return Ok(None);
                }
            };

            Ok(image::RgbImage::from_raw(width, height, decoded).map(Frame::ImageRgb8))
        }
    }
}

#[cfg(feature = "camera")]
pub use nokhwa_impl::NokhwaGrabber;

/// Projector and camera driven directly.
pub struct PhysicalSource {
    device: DeviceState,
    display: Box<dyn PatternDisplay>,
    grabber: Box<dyn FrameGrabber>,
    /// Wait after showing a pattern and after reading the frame.
    settle: Duration,
}

impl PhysicalSource {
    pub fn new(
        device: DeviceState,
        display: Box<dyn PatternDisplay>,
        grabber: Box<dyn FrameGrabber>,
        settle: Duration,
    ) -> Self {
        Self {
            device,
            display,
            grabber,
            settle,
        }
    }
}

impl CaptureSource for PhysicalSource {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Physical
    }

    fn device(&self) -> &DeviceState {
        &self.device
    }

    fn device_mut(&mut self) -> &mut DeviceState {
        &mut self.device
    }

    fn project_and_capture(
        &mut self,
        pattern: &Frame,
        ctx: &RunContext<'_>,
    ) -> Result<Option<Frame>> {
        log::debug!("Projecting pattern for iteration {}", ctx.iteration);

        self.display.show(pattern)?;
        std::thread::sleep(self.settle);

        let frame = self.grabber.grab()?;

        std::thread::sleep(self.settle);
        Ok(frame)
    }
}
