// Resize variants and the resolution policy.
//
// Scale factors are computed in f64 and extents rounded half-away-from-zero
// before any pixels move.

use image::imageops::FilterType;

use crate::error::{CaptureError, Result};
use crate::types::{Frame, ProcessingLayer};

use super::convert::{from_dynamic, to_dynamic};

/// Interpolation used by the resize operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    Cubic,
    Lanczos,
    Nearest,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Linear => FilterType::Triangle,
            Interpolation::Cubic => FilterType::CatmullRom,
            Interpolation::Lanczos => FilterType::Lanczos3,
            Interpolation::Nearest => FilterType::Nearest,
        }
    }
}

/// Resolution constraints applied to a capture before it is returned.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPolicy {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    pub keep_aspect_ratio: bool,
}

impl ResolutionPolicy {
    pub fn keep_aspect() -> Self {
        ResolutionPolicy {
            keep_aspect_ratio: true,
            ..Default::default()
        }
    }
}

/// Resize to an exact target extent.
pub fn resize(
    frame: &Frame,
    target_width: u32,
    target_height: u32,
    interp: Interpolation,
) -> Result<Frame> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "resize: invalid input frame".into(),
        ));
    }
    if target_width == 0 || target_height == 0 {
        return Err(CaptureError::InvalidInput(
            "resize: zero target dimensions".into(),
        ));
    }
    if target_width == frame.width && target_height == frame.height && frame.stride == 0 {
        return Ok(frame.clone());
    }

    let img = to_dynamic(frame)?;
    let resized = img.resize_exact(target_width, target_height, interp.filter());
    from_dynamic(resized, frame.layout)
}

/// Resize preserving aspect ratio (fit-inside).
///
/// When one of the targets is `0` it is computed from the other; when
/// both are given the smaller scale factor wins.
pub fn resize_keep_aspect(
    frame: &Frame,
    target_width: u32,
    target_height: u32,
    interp: Interpolation,
) -> Result<Frame> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "resize_keep_aspect: invalid input frame".into(),
        ));
    }
    if target_width == 0 && target_height == 0 {
        return Err(CaptureError::InvalidInput(
            "resize_keep_aspect: both targets are zero".into(),
        ));
    }

    let (w, h) = if target_width == 0 {
        let ratio = target_height as f64 / frame.height as f64;
        (round_extent(frame.width as f64 * ratio), target_height)
    } else if target_height == 0 {
        let ratio = target_width as f64 / frame.width as f64;
        (target_width, round_extent(frame.height as f64 * ratio))
    } else {
        let ratio = (target_width as f64 / frame.width as f64)
            .min(target_height as f64 / frame.height as f64);
        (
            round_extent(frame.width as f64 * ratio),
            round_extent(frame.height as f64 * ratio),
        )
    };

    resize(frame, w, h, interp)
}

/// Resize to cover the target extent, then center-crop to it exactly.
pub fn resize_and_crop(
    frame: &Frame,
    target_width: u32,
    target_height: u32,
    interp: Interpolation,
) -> Result<Frame> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "resize_and_crop: invalid input frame".into(),
        ));
    }
    if target_width == 0 || target_height == 0 {
        return Err(CaptureError::InvalidInput(
            "resize_and_crop: zero target dimensions".into(),
        ));
    }

    // Larger scale factor so the scaled image covers the target.
    let ratio = (target_width as f64 / frame.width as f64)
        .max(target_height as f64 / frame.height as f64);
    let scaled_w = round_extent(frame.width as f64 * ratio).max(target_width);
    let scaled_h = round_extent(frame.height as f64 * ratio).max(target_height);

    let img = to_dynamic(frame)?;
    let scaled = img.resize_exact(scaled_w, scaled_h, interp.filter());

    let crop_x = (scaled_w - target_width) / 2;
    let crop_y = (scaled_h - target_height) / 2;
    let cropped = scaled.crop_imm(crop_x, crop_y, target_width, target_height);

    from_dynamic(cropped, frame.layout)
}

/// Apply the policy's max constraints, then its explicit target override.
pub fn optimal_resolution(
    current_width: u32,
    current_height: u32,
    policy: &ResolutionPolicy,
) -> (u32, u32) {
    let mut width = current_width;
    let mut height = current_height;

    if let Some(max_w) = policy.max_width {
        if max_w > 0 && width > max_w {
            let ratio = max_w as f64 / width as f64;
            width = max_w;
            if policy.keep_aspect_ratio {
                height = round_extent(height as f64 * ratio);
            }
        }
    }
    if let Some(max_h) = policy.max_height {
        if max_h > 0 && height > max_h {
            let ratio = max_h as f64 / height as f64;
            height = max_h;
            if policy.keep_aspect_ratio {
                width = round_extent(width as f64 * ratio);
            }
        }
    }

    if let Some(target_w) = policy.target_width {
        if target_w > 0 {
            width = target_w;
        }
    }
    if let Some(target_h) = policy.target_height {
        if target_h > 0 {
            height = target_h;
        }
    }

    (width, height)
}

/// Clamp an extent to the ceiling of the given layer, preserving aspect.
///
/// Extents already inside the ceiling pass through untouched.
pub fn adaptive_resolution(
    current_width: u32,
    current_height: u32,
    layer: ProcessingLayer,
) -> (u32, u32) {
    let (max_w, max_h) = layer.ceiling();
    if current_width > max_w || current_height > max_h {
        let ratio = (max_w as f64 / current_width as f64)
            .min(max_h as f64 / current_height as f64);
        (
            round_extent(current_width as f64 * ratio),
            round_extent(current_height as f64 * ratio),
        )
    } else {
        (current_width, current_height)
    }
}

/// Resize `frame` per the policy, or hand it back untouched when nothing
/// needs to change.
pub fn apply_resolution_control(
    frame: Frame,
    policy: &ResolutionPolicy,
    interp: Interpolation,
) -> Result<Frame> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "apply_resolution_control: invalid input frame".into(),
        ));
    }

    let (target_w, target_h) = optimal_resolution(frame.width, frame.height, policy);
    if target_w == frame.width && target_h == frame.height {
        return Ok(frame);
    }

    if policy.keep_aspect_ratio {
        resize_keep_aspect(&frame, target_w, target_h, interp)
    } else {
        resize(&frame, target_w, target_h, interp)
    }
}

/// Round a scaled extent half-away-from-zero, never below 1.
fn round_extent(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelLayout;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut frame = Frame::allocate(width, height, PixelLayout::Bgr24, 0);
        for y in 0..height as usize {
            for x in 0..width as usize {
                let i = (y * width as usize + x) * 3;
                frame.data[i] = (x % 256) as u8;
                frame.data[i + 1] = (y % 256) as u8;
                frame.data[i + 2] = ((x + y) % 256) as u8;
            }
        }
        frame
    }

    #[test]
    fn resize_exact_extent() {
        let frame = gradient(64, 48);
        let out = resize(&frame, 32, 32, Interpolation::Linear).unwrap();
        assert_eq!((out.width, out.height), (32, 32));
        assert_eq!(out.layout, PixelLayout::Bgr24);
        assert_eq!(out.data.len(), 32 * 32 * 3);
    }

    #[test]
    fn resize_rejects_zero_dims() {
        let frame = gradient(8, 8);
        assert!(resize(&frame, 0, 8, Interpolation::Linear).is_err());
        assert!(resize(&frame, 8, 0, Interpolation::Linear).is_err());
    }

    #[test]
    fn resize_to_same_extent_is_identity_for_nearest() {
        let frame = gradient(16, 12);
        let out = resize(&frame, 16, 12, Interpolation::Nearest).unwrap();
        assert_eq!(out.data, frame.data);
    }

    #[test]
    fn keep_aspect_derives_missing_extent() {
        let frame = gradient(192, 108);
        let out = resize_keep_aspect(&frame, 128, 0, Interpolation::Linear).unwrap();
        assert_eq!((out.width, out.height), (128, 72));

        let out = resize_keep_aspect(&frame, 0, 54, Interpolation::Linear).unwrap();
        assert_eq!((out.width, out.height), (96, 54));
    }

    #[test]
    fn keep_aspect_fits_inside_both_targets() {
        let frame = gradient(192, 108);
        let out = resize_keep_aspect(&frame, 100, 100, Interpolation::Linear).unwrap();
        assert!(out.width <= 100 && out.height <= 100);
        assert_eq!((out.width, out.height), (100, 56));
    }

    #[test]
    fn resize_and_crop_hits_target_exactly() {
        let frame = gradient(192, 108);
        let out = resize_and_crop(&frame, 50, 50, Interpolation::Linear).unwrap();
        assert_eq!((out.width, out.height), (50, 50));
    }

    #[test]
    fn optimal_resolution_applies_max_then_target() {
        let policy = ResolutionPolicy {
            max_width: Some(960),
            max_height: Some(600),
            keep_aspect_ratio: true,
            ..Default::default()
        };
        let (w, h) = optimal_resolution(1920, 1080, &policy);
        assert!(w <= 960 && h <= 600);
        // Aspect preserved within a pixel.
        let aspect_in = 1920.0 / 1080.0;
        let aspect_out = w as f64 / h as f64;
        assert!((aspect_in - aspect_out).abs() < 0.01);

        let policy = ResolutionPolicy {
            max_width: Some(960),
            target_width: Some(320),
            target_height: Some(200),
            keep_aspect_ratio: true,
            ..Default::default()
        };
        assert_eq!(optimal_resolution(1920, 1080, &policy), (320, 200));
    }

    #[test]
    fn adaptive_resolution_layer_table() {
        assert_eq!(
            adaptive_resolution(1920, 1080, ProcessingLayer::Realtime),
            (640, 360)
        );
        assert_eq!(
            adaptive_resolution(3840, 2160, ProcessingLayer::Analysis),
            (1920, 1080)
        );
        assert_eq!(
            adaptive_resolution(640, 480, ProcessingLayer::Realtime),
            (640, 480)
        );
        assert_eq!(
            adaptive_resolution(800, 600, ProcessingLayer::Understanding),
            (800, 600)
        );
    }

    #[test]
    fn adaptive_resolution_never_exceeds_ceiling() {
        for layer in [
            ProcessingLayer::Realtime,
            ProcessingLayer::Detection,
            ProcessingLayer::Analysis,
            ProcessingLayer::Understanding,
        ] {
            let (max_w, max_h) = layer.ceiling();
            for &(w, h) in &[(5000u32, 3000u32), (1921, 1081), (333, 7777)] {
                let (ow, oh) = adaptive_resolution(w, h, layer);
                assert!(ow <= max_w, "{ow} > {max_w}");
                assert!(oh <= max_h, "{oh} > {max_h}");
            }
        }
    }

    #[test]
    fn apply_resolution_control_passes_through_when_unchanged() {
        let frame = gradient(100, 80);
        let before = frame.data.clone();
        let out =
            apply_resolution_control(frame, &ResolutionPolicy::keep_aspect(), Interpolation::Linear)
                .unwrap();
        assert_eq!(out.data, before);
    }
}
