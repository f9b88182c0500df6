// Capture engine: backend contract, per-call options, and the platform
// facade that selects a backend at construction time.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(windows)]
pub mod windows;

#[cfg(not(any(windows, target_os = "linux", target_os = "macos")))]
mod stub;

use crate::error::Result;
use crate::imageops::{self, Interpolation, ResolutionPolicy};
use crate::types::{DisplayInfo, Frame, ProcessingLayer, Rect, WindowHandle};

#[cfg(target_os = "linux")]
use self::linux::LinuxCapture as PlatformBackend;
#[cfg(target_os = "macos")]
use self::macos::MacosCapture as PlatformBackend;
#[cfg(windows)]
use self::windows::WindowsCapture as PlatformBackend;

#[cfg(not(any(windows, target_os = "linux", target_os = "macos")))]
use self::stub::StubCapture as PlatformBackend;

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// The seven operations every platform backend provides.
///
/// Captured frames are tightly packed BGR24, row-major, top-down. All
/// failures are returned, never thrown; backends additionally keep a
/// per-instance last-error string for diagnostics.
pub trait CaptureBackend {
    /// Capture one frame of the display with the given dense id.
    fn capture_full_screen(&mut self, display_id: i32) -> Result<Frame>;

    /// Capture one frame of a single window.
    fn capture_window(&mut self, handle: WindowHandle) -> Result<Frame>;

    /// Capture a sub-region, interpreted in virtual-desktop coordinates.
    fn capture_region(&mut self, region: &Rect, display_id: i32) -> Result<Frame>;

    /// Enumerate attached displays.
    fn displays(&mut self) -> Vec<DisplayInfo>;

    fn supports_window_capture(&self) -> bool;

    fn supports_region_capture(&self) -> bool;

    /// Short name of the acquisition path used by the last successful
    /// capture (e.g. `"duplication"`, `"wgc"`, `"gdi"`, `"x11"`).
    fn capture_method(&self) -> &'static str;

    /// Message recorded by the most recent failure.
    fn last_error(&self) -> String;
}

// ---------------------------------------------------------------------------
// Per-call options
// ---------------------------------------------------------------------------

/// Resolution shaping and encode selection for a single capture call.
///
/// The default performs no post-processing: the backend's BGR24 frame is
/// returned as-is.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Downscale (preserving aspect when `keep_aspect_ratio`) if wider.
    pub max_width: Option<u32>,
    /// Downscale if taller.
    pub max_height: Option<u32>,
    /// Explicit target width; overrides the max constraints.
    pub target_width: Option<u32>,
    /// Explicit target height; overrides the max constraints.
    pub target_height: Option<u32>,
    /// Fit-inside semantics when true, stretch when false.
    pub keep_aspect_ratio: bool,
    /// Clamp to the ceiling of [`CaptureOptions::layer`] before anything else.
    pub adaptive_resolution: bool,
    /// Downstream stage used by the adaptive clamp.
    pub layer: ProcessingLayer,
    /// Encode as JPEG at this quality (0–100) instead of returning raw.
    pub jpeg_quality: Option<i32>,
    /// Encode as PNG at this level (0–9) instead of returning raw.
    /// Ignored when `jpeg_quality` is also set.
    pub png_compression: Option<i32>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureOptions {
            max_width: None,
            max_height: None,
            target_width: None,
            target_height: None,
            keep_aspect_ratio: true,
            adaptive_resolution: false,
            layer: ProcessingLayer::Realtime,
            jpeg_quality: None,
            png_compression: None,
        }
    }
}

impl CaptureOptions {
    fn resolution_policy(&self) -> ResolutionPolicy {
        ResolutionPolicy {
            max_width: self.max_width,
            max_height: self.max_height,
            target_width: self.target_width,
            target_height: self.target_height,
            keep_aspect_ratio: self.keep_aspect_ratio,
        }
    }

    fn is_default_shaping(&self) -> bool {
        self.max_width.is_none()
            && self.max_height.is_none()
            && self.target_width.is_none()
            && self.target_height.is_none()
            && !self.adaptive_resolution
            && self.jpeg_quality.is_none()
            && self.png_compression.is_none()
    }
}

/// Result of a facade capture call.
#[derive(Debug, Clone)]
pub enum CaptureOutput {
    /// Raw BGR24 frame (possibly resized).
    Frame(Frame),
    /// Baseline JPEG bytes.
    Jpeg(Vec<u8>),
    /// PNG bytes.
    Png(Vec<u8>),
}

impl CaptureOutput {
    /// The raw frame, when no encode option was set.
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            CaptureOutput::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Encoded bytes, when an encode option was set.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            CaptureOutput::Jpeg(bytes) | CaptureOutput::Png(bytes) => Some(bytes),
            CaptureOutput::Frame(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Platform-selecting capture facade.
///
/// Performs no capture itself: every call is forwarded to the compiled
/// backend, and the returned frame is then shaped per the
/// [`CaptureOptions`]. One instance is a single-threaded session; run
/// one per acquisition thread.
pub struct ScreenCapture {
    backend: PlatformBackend,
}

impl ScreenCapture {
    /// Construct the backend for the current platform.
    pub fn new() -> Result<Self> {
        Ok(ScreenCapture {
            backend: PlatformBackend::new()?,
        })
    }

    /// Whether the current platform has an implemented backend.
    pub fn is_supported() -> bool {
        cfg!(any(windows, target_os = "linux", target_os = "macos"))
    }

    /// Capture the display with the given dense id.
    pub fn capture_full_screen(
        &mut self,
        display_id: i32,
        options: &CaptureOptions,
    ) -> Result<CaptureOutput> {
        let frame = self.backend.capture_full_screen(display_id)?;
        shape_output(frame, options)
    }

    /// Capture the primary display with default options.
    pub fn capture_primary(&mut self) -> Result<Frame> {
        self.backend.capture_full_screen(0)
    }

    /// Capture a single window.
    pub fn capture_window(
        &mut self,
        handle: WindowHandle,
        options: &CaptureOptions,
    ) -> Result<CaptureOutput> {
        let frame = self.backend.capture_window(handle)?;
        shape_output(frame, options)
    }

    /// Capture a sub-region.
    ///
    /// The rect is interpreted in virtual-desktop coordinates and
    /// `display_id` is advisory: the Windows backend ignores it, so a
    /// rect that spans a display with a non-zero origin indexes the
    /// virtual desktop, not that display.
    pub fn capture_region(
        &mut self,
        region: &Rect,
        display_id: i32,
        options: &CaptureOptions,
    ) -> Result<CaptureOutput> {
        let frame = self.backend.capture_region(region, display_id)?;
        shape_output(frame, options)
    }

    pub fn displays(&mut self) -> Vec<DisplayInfo> {
        self.backend.displays()
    }

    pub fn supports_window_capture(&self) -> bool {
        self.backend.supports_window_capture()
    }

    pub fn supports_region_capture(&self) -> bool {
        self.backend.supports_region_capture()
    }

    /// Acquisition path used by the last successful capture.
    pub fn capture_method(&self) -> &'static str {
        self.backend.capture_method()
    }

    pub fn last_error(&self) -> String {
        self.backend.last_error()
    }
}

#[cfg(target_os = "macos")]
impl ScreenCapture {
    /// Whether the screen-recording TCC permission has been granted.
    pub fn check_screen_recording_permission(&self) -> bool {
        self.backend.check_screen_recording_permission()
    }

    /// Ask the OS for the screen-recording permission; pops the system
    /// dialog on first use.
    pub fn request_screen_recording_permission(&self) -> bool {
        self.backend.request_screen_recording_permission()
    }
}

#[cfg(windows)]
impl ScreenCapture {
    /// Whether the hardware desktop-duplication tier is still usable.
    pub fn duplication_available(&self) -> bool {
        self.backend.duplication_available()
    }

    /// Known capture/remote-desktop tools currently running that are
    /// likely to hold the desktop-duplication slot. Diagnostic only.
    pub fn occupying_processes(&self) -> Vec<String> {
        self.backend.occupying_processes()
    }
}

/// Apply adaptive clamp, resolution policy, then the optional encode.
fn shape_output(frame: Frame, options: &CaptureOptions) -> Result<CaptureOutput> {
    if options.is_default_shaping() {
        return Ok(CaptureOutput::Frame(frame));
    }

    let mut frame = frame;

    if options.adaptive_resolution {
        let (w, h) = imageops::adaptive_resolution(frame.width, frame.height, options.layer);
        if (w, h) != (frame.width, frame.height) {
            frame = imageops::resize(&frame, w, h, Interpolation::Linear)?;
        }
    }

    frame = imageops::apply_resolution_control(
        frame,
        &options.resolution_policy(),
        Interpolation::Linear,
    )?;

    if let Some(quality) = options.jpeg_quality {
        return Ok(CaptureOutput::Jpeg(imageops::encode_jpeg(&frame, quality)?));
    }
    if let Some(level) = options.png_compression {
        return Ok(CaptureOutput::Png(imageops::encode_png(&frame, level)?));
    }

    Ok(CaptureOutput::Frame(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelLayout;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::allocate(width, height, PixelLayout::Bgr24, 0)
    }

    #[test]
    fn default_options_pass_frame_through() {
        let out = shape_output(frame(64, 48), &CaptureOptions::default()).unwrap();
        let f = out.into_frame().unwrap();
        assert_eq!((f.width, f.height), (64, 48));
    }

    #[test]
    fn adaptive_option_clamps_to_layer_ceiling() {
        let options = CaptureOptions {
            adaptive_resolution: true,
            layer: ProcessingLayer::Realtime,
            ..Default::default()
        };
        let out = shape_output(frame(1920, 1080), &options).unwrap();
        let f = out.into_frame().unwrap();
        assert_eq!((f.width, f.height), (640, 360));
    }

    #[test]
    fn jpeg_option_returns_encoded_bytes() {
        let options = CaptureOptions {
            jpeg_quality: Some(80),
            ..Default::default()
        };
        let out = shape_output(frame(32, 32), &options).unwrap();
        match out {
            CaptureOutput::Jpeg(bytes) => assert!(!bytes.is_empty()),
            other => panic!("expected JPEG output, got {other:?}"),
        }
    }

    #[test]
    fn jpeg_wins_over_png_when_both_set() {
        let options = CaptureOptions {
            jpeg_quality: Some(80),
            png_compression: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            shape_output(frame(16, 16), &options).unwrap(),
            CaptureOutput::Jpeg(_)
        ));
    }

    #[test]
    fn max_constraint_shrinks_frame() {
        let options = CaptureOptions {
            max_width: Some(100),
            ..Default::default()
        };
        let out = shape_output(frame(200, 100), &options).unwrap();
        let f = out.into_frame().unwrap();
        assert_eq!((f.width, f.height), (100, 50));
    }
}
