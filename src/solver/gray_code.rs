//! Column Gray code solver.
//!
//! Projects a white and a black reference followed by one positive/inverted
//! pair per Gray code bit. Each camera pixel with enough white/black contrast
//! decodes to a pattern column; the correspondence for a pattern column on a
//! camera row is the mean camera x of the pixels that decoded to it.

use image::GrayImage;

use super::PatternSolver;
use crate::capture::Frame;
use crate::error::Result;
use crate::experiment::RunContext;

/// What is projected at a given iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSpec {
    White,
    Black,
    /// Gray code bit, most significant first.
    Bit { bit_index: u32, inverted: bool },
}

/// Gray code structured light solver.
pub struct GrayCodeSolver {
    identifier: String,
    pattern_width: u32,
    pattern_height: u32,
    bits: u32,
    /// Minimum white/black contrast (0.0-1.0) for a pixel to be decoded.
    contrast_threshold: f32,
    captures: Vec<Option<GrayImage>>,
    camera_width: u32,
    camera_height: u32,
    /// Per (camera row, pattern column) mean camera x; NaN where unmatched.
    correspondences: Vec<f64>,
}

impl GrayCodeSolver {
    pub fn new(identifier: impl Into<String>, pattern_width: u32, pattern_height: u32) -> Self {
        let bits = (pattern_width.max(2) as f32).log2().ceil() as u32;

        Self {
            identifier: identifier.into(),
            pattern_width,
            pattern_height,
            bits,
            contrast_threshold: 0.1,
            captures: Vec::new(),
            camera_width: 0,
            camera_height: 0,
            correspondences: Vec::new(),
        }
    }

    pub fn with_contrast_threshold(mut self, threshold: f32) -> Self {
        self.contrast_threshold = threshold;
        self
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Total number of iterations: two references plus a pair per bit.
    pub fn total_patterns(&self) -> usize {
        (self.bits * 2 + 2) as usize
    }

    pub fn pattern_spec(&self, iteration: usize) -> Option<PatternSpec> {
        match iteration {
            0 => Some(PatternSpec::White),
            1 => Some(PatternSpec::Black),
            i if i < self.total_patterns() => Some(PatternSpec::Bit {
                bit_index: ((i - 2) / 2) as u32,
                inverted: (i - 2) % 2 == 1,
            }),
            _ => None,
        }
    }

    /// Convert binary value to Gray code.
    pub fn binary_to_gray(binary: u32) -> u32 {
        binary ^ (binary >> 1)
    }

    /// Convert Gray code back to binary.
    pub fn gray_to_binary(gray: u32) -> u32 {
        let mut binary = gray;
        let mut shift = 1;
        while shift < 32 {
            binary ^= binary >> shift;
            shift *= 2;
        }
        binary
    }

    /// Render the pattern for `spec`.
    pub fn render(&self, spec: PatternSpec) -> GrayImage {
        match spec {
            PatternSpec::White => {
                GrayImage::from_pixel(self.pattern_width, self.pattern_height, image::Luma([255]))
            }
            PatternSpec::Black => {
                GrayImage::from_pixel(self.pattern_width, self.pattern_height, image::Luma([0]))
            }
            PatternSpec::Bit {
                bit_index,
                inverted,
            } => {
                let bit_position = self.bits - 1 - bit_index;
                GrayImage::from_fn(self.pattern_width, self.pattern_height, |x, _| {
                    let bit_value = (Self::binary_to_gray(x) >> bit_position) & 1;
                    let value = if inverted { 1 - bit_value } else { bit_value };
                    image::Luma([if value == 1 { 255 } else { 0 }])
                })
            }
        }
    }

    /// Decode the captured sequence into the correspondence table.
    fn decode(&mut self) {
        self.correspondences.clear();

        let frames: Option<Vec<&GrayImage>> = self.captures.iter().map(|c| c.as_ref()).collect();
        let frames = match frames {
            Some(frames) if frames.len() == self.total_patterns() => frames,
            _ => {
                log::warn!("{}: incomplete capture sequence, nothing decoded", self.identifier);
                return;
            }
        };

        let (width, height) = frames[0].dimensions();
        if frames.iter().any(|f| f.dimensions() != (width, height)) {
            log::warn!("{}: capture sizes differ, nothing decoded", self.identifier);
            return;
        }

        self.camera_width = width;
        self.camera_height = height;

        let columns = self.pattern_width as usize;
        let mut sums = vec![0.0f64; columns * height as usize];
        let mut counts = vec![0u32; columns * height as usize];

        let white = frames[0];
        let black = frames[1];
        let pairs = &frames[2..];
        let mut decoded = 0usize;

        for y in 0..height {
            for x in 0..width {
                let contrast =
                    (white.get_pixel(x, y)[0] as f32 - black.get_pixel(x, y)[0] as f32) / 255.0;
                if contrast < self.contrast_threshold {
                    continue;
                }

                let mut gray_code: u32 = 0;
                for (bit_idx, pair) in pairs.chunks(2).enumerate() {
                    let positive = pair[0].get_pixel(x, y)[0] as f32;
                    let inverted = pair[1].get_pixel(x, y)[0] as f32;
                    if positive - inverted > 0.0 {
                        gray_code |= 1 << (self.bits - 1 - bit_idx as u32);
                    }
                }

                let column = Self::gray_to_binary(gray_code) as usize;
                if column >= columns {
                    continue;
                }

                let idx = y as usize * columns + column;
                sums[idx] += x as f64;
                counts[idx] += 1;
                decoded += 1;
            }
        }

        self.correspondences = sums
            .iter()
            .zip(&counts)
            .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { f64::NAN })
            .collect();

        log::info!("{}: decoded {} pixel(s)", self.identifier, decoded);
    }
}

impl PatternSolver for GrayCodeSolver {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn pattern_width(&self) -> u32 {
        self.pattern_width
    }

    fn pre_experiment_run(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        self.captures.clear();
        self.correspondences.clear();
        Ok(())
    }

    fn has_more_iterations(&self, ctx: &RunContext<'_>) -> bool {
        ctx.iteration < self.total_patterns()
    }

    fn generate_pattern(&mut self, ctx: &RunContext<'_>) -> Result<Frame> {
        let spec = self.pattern_spec(ctx.iteration).unwrap_or(PatternSpec::Black);
        Ok(Frame::ImageLuma8(self.render(spec)))
    }

    fn process_capture(&mut self, capture: Option<&Frame>, ctx: &RunContext<'_>) -> Result<()> {
        self.captures.push(capture.map(|frame| frame.to_luma8()));

        if ctx.iteration + 1 == self.total_patterns() {
            self.decode();
        }
        Ok(())
    }

    fn solve_correspondence(&self, x_pattern: u32, y: u32) -> f64 {
        if x_pattern >= self.pattern_width || y >= self.camera_height {
            return f64::NAN;
        }
        self.correspondences
            .get(y as usize * self.pattern_width as usize + x_pattern as usize)
            .copied()
            .unwrap_or(f64::NAN)
    }
}
