// Frame-triage engine (Layer 0).
//
// Ingests every captured frame and decides, cheaply, whether anything
// meaningful changed: pixel difference, color-distribution shift and
// sparse optical flow are fused into one score that gates the more
// expensive downstream stages. All work happens on a small working image
// so the engine sustains interactive rates on full-desktop input.

mod color;
mod diff;
mod motion;

use image::{GrayImage, RgbImage};

use crate::imageops::{self, Interpolation};
use crate::types::{Frame, Rect};

/// Tunables for the triage engine.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    // Frame difference.
    /// Normalized per-pixel threshold for the gray diff (0–1).
    pub frame_diff_threshold: f64,
    /// Side of the square morphology kernel.
    pub morph_kernel_size: u32,

    // Color analysis.
    /// Hue histogram bucket count.
    pub histogram_bins: usize,
    /// Advisory threshold for hosts reacting to the color score alone.
    pub color_change_threshold: f64,
    /// Extract three dominant colors per frame.
    pub enable_dominant_color: bool,

    // Motion.
    pub enable_motion_detection: bool,
    /// Corner budget for the optical flow.
    pub optical_flow_points: usize,
    /// Normalized motion threshold; scaled by 10 px for region voting.
    pub motion_threshold: f64,

    // Fusion.
    pub frame_diff_weight: f64,
    pub color_change_weight: f64,
    pub motion_weight: f64,
    /// Fused score at or above this triggers the next layer.
    pub overall_threshold: f64,

    // Working image.
    pub processing_width: u32,
    pub processing_height: u32,
    pub enable_adaptive_threshold: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        TriageConfig {
            frame_diff_threshold: 0.1,
            morph_kernel_size: 3,
            histogram_bins: 32,
            color_change_threshold: 0.15,
            enable_dominant_color: false,
            enable_motion_detection: true,
            optical_flow_points: 100,
            motion_threshold: 0.1,
            frame_diff_weight: 0.4,
            color_change_weight: 0.3,
            motion_weight: 0.3,
            overall_threshold: 0.2,
            processing_width: 640,
            processing_height: 480,
            enable_adaptive_threshold: true,
        }
    }
}

/// Per-frame triage verdict.
///
/// Scores are each in [0, 1]; region rects are in working-image
/// coordinates (`processing_width × processing_height`).
#[derive(Debug, Clone, Default)]
pub struct TriageResult {
    pub frame_diff_score: f64,
    pub changed_regions: Vec<Rect>,

    pub color_change_score: f64,
    /// Dominant colors as RGB floats in [0, 1], three per color.
    pub dominant_colors: Vec<f32>,

    pub motion_score: f64,
    pub motion_regions: Vec<Rect>,

    /// `wd·diff + wc·color + wm·motion`, clamped to [0, 1].
    pub overall_change_score: f64,
    pub should_trigger_layer1: bool,
}

// Adaptive threshold trajectory.
const ADAPTIVE_ALPHA: f64 = 0.1;
const ADAPTIVE_TARGET: f64 = 0.3;
const ADAPTIVE_MIN: f64 = 0.05;
const ADAPTIVE_MAX: f64 = 0.5;

/// Hidden working state: the previous frames and the adaptive threshold.
struct TriageState {
    previous_gray: Option<GrayImage>,
    previous_color: Option<RgbImage>,
    adaptive_threshold: f64,
}

/// Layer-0 triage engine. One instance per session, single-threaded.
pub struct TriageEngine {
    config: TriageConfig,
    state: TriageState,
}

impl TriageEngine {
    pub fn new(config: TriageConfig) -> Self {
        let adaptive_threshold = config.overall_threshold;
        TriageEngine {
            config,
            state: TriageState {
                previous_gray: None,
                previous_color: None,
                adaptive_threshold,
            },
        }
    }

    /// Run the triage pipeline on one frame.
    ///
    /// Invalid frames and the first frame after construction or
    /// [`reset`](Self::reset) yield all-zero scores and no trigger.
    pub fn process_frame(&mut self, frame: &Frame) -> TriageResult {
        let mut result = TriageResult::default();

        if !frame.is_valid() {
            return result;
        }

        // Shrink to the working size; every signal runs on this image.
        let (color, gray) = match self.working_images(frame) {
            Some(images) => images,
            None => return result,
        };

        let has_previous = self
            .state
            .previous_gray
            .as_ref()
            .map(|prev| prev.dimensions() == gray.dimensions())
            .unwrap_or(false)
            && self
                .state
                .previous_color
                .as_ref()
                .map(|prev| prev.dimensions() == color.dimensions())
                .unwrap_or(false);

        if has_previous {
            let previous_gray = self.state.previous_gray.as_ref().expect("checked above");
            let previous_color = self.state.previous_color.as_ref().expect("checked above");

            let diff = diff::frame_difference(
                &gray,
                previous_gray,
                self.config.frame_diff_threshold,
                self.config.morph_kernel_size,
            );
            result.frame_diff_score = diff.score;
            result.changed_regions = diff.regions;

            result.color_change_score =
                color::color_change(&color, previous_color, self.config.histogram_bins);
            if self.config.enable_dominant_color {
                result.dominant_colors = color::dominant_colors(&color::downsample4(&color));
            }

            if self.config.enable_motion_detection {
                let motion = motion::detect_motion(
                    &gray,
                    previous_gray,
                    self.config.optical_flow_points,
                    self.config.motion_threshold,
                );
                result.motion_score = motion.score;
                result.motion_regions = motion.regions;
            }
        }

        result.overall_change_score = (self.config.frame_diff_weight * result.frame_diff_score
            + self.config.color_change_weight * result.color_change_score
            + self.config.motion_weight * result.motion_score)
            .clamp(0.0, 1.0);

        let threshold = if self.config.enable_adaptive_threshold {
            self.state.adaptive_threshold
        } else {
            self.config.overall_threshold
        };
        result.should_trigger_layer1 = has_previous && result.overall_change_score >= threshold;

        if self.config.enable_adaptive_threshold && has_previous {
            self.update_adaptive_threshold(result.overall_change_score);
        }

        self.state.previous_gray = Some(gray);
        self.state.previous_color = Some(color);

        result
    }

    /// Drop the held frames and restore the configured threshold.
    pub fn reset(&mut self) {
        self.state.previous_gray = None;
        self.state.previous_color = None;
        self.state.adaptive_threshold = self.config.overall_threshold;
    }

    /// Swap the configuration. Turning the adaptive threshold off snaps
    /// the effective threshold back to the configured one.
    pub fn update_config(&mut self, config: TriageConfig) {
        self.config = config;
        if !self.config.enable_adaptive_threshold {
            self.state.adaptive_threshold = self.config.overall_threshold;
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Effective trigger threshold for the next frame.
    pub fn effective_threshold(&self) -> f64 {
        if self.config.enable_adaptive_threshold {
            self.state.adaptive_threshold
        } else {
            self.config.overall_threshold
        }
    }

    /// Resize to the working extent and split into color + gray copies.
    fn working_images(&self, frame: &Frame) -> Option<(RgbImage, GrayImage)> {
        let working = if frame.width != self.config.processing_width
            || frame.height != self.config.processing_height
        {
            imageops::resize(
                frame,
                self.config.processing_width,
                self.config.processing_height,
                Interpolation::Linear,
            )
            .ok()?
        } else {
            // Normalize layout without resampling.
            imageops::convert(frame, frame.layout).ok()?
        };

        let color = imageops::to_rgb_image(&working).ok()?;
        let gray = imageops::to_gray_image(&working).ok()?;
        Some((color, gray))
    }

    /// Multiplicative walk toward the activity level: busier streams
    /// raise the bar, quiet ones lower it. Runs on every processed frame
    /// using the post-clamp score, regardless of the trigger outcome.
    fn update_adaptive_threshold(&mut self, overall_score: f64) {
        let threshold = if overall_score > ADAPTIVE_TARGET {
            self.state.adaptive_threshold * (1.0 + ADAPTIVE_ALPHA)
        } else {
            self.state.adaptive_threshold * (1.0 - ADAPTIVE_ALPHA)
        };
        self.state.adaptive_threshold = threshold.clamp(ADAPTIVE_MIN, ADAPTIVE_MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelLayout;

    fn solid_bgr(width: u32, height: u32, b: u8, g: u8, r: u8) -> Frame {
        let mut frame = Frame::allocate(width, height, PixelLayout::Bgr24, 0);
        for px in frame.data.chunks_exact_mut(3) {
            px[0] = b;
            px[1] = g;
            px[2] = r;
        }
        frame
    }

    #[test]
    fn first_frame_is_all_zero_and_untriggered() {
        let mut engine = TriageEngine::new(TriageConfig::default());
        let frame = solid_bgr(320, 240, 128, 128, 128);
        let result = engine.process_frame(&frame);
        assert_eq!(result.frame_diff_score, 0.0);
        assert_eq!(result.color_change_score, 0.0);
        assert_eq!(result.motion_score, 0.0);
        assert_eq!(result.overall_change_score, 0.0);
        assert!(!result.should_trigger_layer1);
        assert!(result.changed_regions.is_empty());
    }

    #[test]
    fn invalid_frame_is_all_zero() {
        let mut engine = TriageEngine::new(TriageConfig::default());
        let result = engine.process_frame(&Frame::default());
        assert_eq!(result.overall_change_score, 0.0);
        assert!(!result.should_trigger_layer1);
    }

    #[test]
    fn identical_frames_stay_quiet() {
        let mut engine = TriageEngine::new(TriageConfig::default());
        let frame = solid_bgr(320, 240, 128, 128, 128);
        engine.process_frame(&frame);
        let result = engine.process_frame(&frame);
        assert!(result.frame_diff_score < 0.1);
        assert!(result.color_change_score < 0.1);
    }

    #[test]
    fn reset_forgets_the_previous_frame() {
        let mut engine = TriageEngine::new(TriageConfig::default());
        let gray = solid_bgr(320, 240, 128, 128, 128);
        let red = solid_bgr(320, 240, 0, 0, 255);

        engine.process_frame(&gray);
        engine.reset();
        let result = engine.process_frame(&red);
        assert_eq!(result.overall_change_score, 0.0);
        assert!(!result.should_trigger_layer1);
    }

    #[test]
    fn config_swap_snaps_adaptive_threshold_off() {
        let mut engine = TriageEngine::new(TriageConfig::default());
        let a = solid_bgr(160, 120, 0, 0, 0);
        let b = solid_bgr(160, 120, 255, 255, 255);
        engine.process_frame(&a);
        engine.process_frame(&b);
        // Adaptive walk has moved the threshold somewhere.
        let config = TriageConfig {
            enable_adaptive_threshold: false,
            ..TriageConfig::default()
        };
        engine.update_config(config);
        assert_eq!(engine.effective_threshold(), 0.2);
    }

    #[test]
    fn adaptive_threshold_stays_clamped() {
        let mut engine = TriageEngine::new(TriageConfig::default());
        let black = solid_bgr(160, 120, 0, 0, 0);
        let white = solid_bgr(160, 120, 255, 255, 255);

        // Alternate wildly; the walk must never leave [0.05, 0.5].
        for i in 0..60 {
            let frame = if i % 2 == 0 { &black } else { &white };
            engine.process_frame(frame);
            let t = engine.effective_threshold();
            assert!((0.05..=0.5).contains(&t), "threshold {t} escaped");
        }

        // And a long quiet stretch drives it to the floor.
        for _ in 0..60 {
            engine.process_frame(&black);
        }
        assert!((engine.effective_threshold() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn size_change_midstream_acts_like_first_frame() {
        let config = TriageConfig::default();
        let mut engine = TriageEngine::new(config.clone());
        let frame = solid_bgr(320, 240, 10, 10, 10);
        engine.process_frame(&frame);

        // Shrink the working size: held frames no longer match.
        engine.update_config(TriageConfig {
            processing_width: 320,
            processing_height: 240,
            ..config
        });
        let red = solid_bgr(320, 240, 0, 0, 255);
        let result = engine.process_frame(&red);
        assert_eq!(result.overall_change_score, 0.0);
        assert!(!result.should_trigger_layer1);
    }

    #[test]
    fn dominant_colors_emitted_when_enabled() {
        let config = TriageConfig {
            enable_dominant_color: true,
            ..TriageConfig::default()
        };
        let mut engine = TriageEngine::new(config);
        let frame = solid_bgr(320, 240, 10, 40, 200);
        engine.process_frame(&frame);
        let result = engine.process_frame(&frame);
        assert_eq!(result.dominant_colors.len(), 9);
        // Centers are RGB floats; red channel of a (200, 40, 10) RGB pixel.
        assert!((result.dominant_colors[0] - 200.0 / 255.0).abs() < 0.02);
    }

    #[test]
    fn gray_input_frames_are_accepted() {
        let mut engine = TriageEngine::new(TriageConfig::default());
        let mut frame = Frame::allocate(320, 240, PixelLayout::Gray8, 0);
        frame.data.iter_mut().for_each(|b| *b = 99);
        engine.process_frame(&frame);
        let result = engine.process_frame(&frame);
        assert!(result.frame_diff_score < 0.1);
    }
}
