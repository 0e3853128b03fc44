//! Lens undistortion of captured frames.

use image::{Rgb, RgbImage};

use super::{CameraCalibration, Frame};

/// Apply the Brown-Conrady (k1, k2, p1, p2, k3) distortion to normalized coordinates.
fn distort(calibration: &CameraCalibration, x: f64, y: f64) -> (f64, f64) {
    let [k1, k2, p1, p2, k3] = calibration.distortion;

    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;

    let x_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
    let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

    (x * radial + x_tan, y * radial + y_tan)
}

/// Bilinear sample; pixels outside the source are black.
fn sample(src: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (width, height) = src.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f64 || y > (height - 1) as f64 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x1, y0);
    let p01 = src.get_pixel(x0, y1);
    let p11 = src.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Remove lens distortion from a captured frame.
///
/// Each output pixel is mapped through the inverse intrinsics, distorted with
/// the calibration's coefficients, and sampled from the input. A calibration
/// without distortion returns the frame unchanged.
pub fn undistort(frame: &Frame, calibration: &CameraCalibration) -> Frame {
    if !calibration.has_distortion() || frame.width() == 0 || frame.height() == 0 {
        return frame.clone();
    }

    let src = frame.to_rgb8();
    let (fx, fy) = (calibration.fx(), calibration.fy());
    let (cx, cy) = (calibration.cx(), calibration.cy());

    let out = RgbImage::from_fn(src.width(), src.height(), |u, v| {
        let x = (u as f64 - cx) / fx;
        let y = (v as f64 - cy) / fy;
        let (xd, yd) = distort(calibration, x, y);
        sample(&src, fx * xd + cx, fy * yd + cy)
    });

    Frame::ImageRgb8(out)
}
