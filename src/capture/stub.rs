// Fallback backend for platforms without an implementation.

use crate::error::{CaptureError, Result};
use crate::types::{DisplayInfo, Frame, Rect, WindowHandle};

use super::CaptureBackend;

pub struct StubCapture;

impl StubCapture {
    pub fn new() -> Result<Self> {
        Err(CaptureError::PlatformUnsupported(
            "no capture backend for this platform".into(),
        ))
    }
}

impl CaptureBackend for StubCapture {
    fn capture_full_screen(&mut self, _display_id: i32) -> Result<Frame> {
        Err(CaptureError::PlatformUnsupported(
            "no capture backend for this platform".into(),
        ))
    }

    fn capture_window(&mut self, _handle: WindowHandle) -> Result<Frame> {
        Err(CaptureError::PlatformUnsupported(
            "no capture backend for this platform".into(),
        ))
    }

    fn capture_region(&mut self, _region: &Rect, _display_id: i32) -> Result<Frame> {
        Err(CaptureError::PlatformUnsupported(
            "no capture backend for this platform".into(),
        ))
    }

    fn displays(&mut self) -> Vec<DisplayInfo> {
        Vec::new()
    }

    fn supports_window_capture(&self) -> bool {
        false
    }

    fn supports_region_capture(&self) -> bool {
        false
    }

    fn capture_method(&self) -> &'static str {
        "none"
    }

    fn last_error(&self) -> String {
        "platform not supported".into()
    }
}
