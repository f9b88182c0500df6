// Linux backend: X11 or Wayland, decided once at construction.
//
// X11 captures through XShmGetImage (shared memory) when the MIT-SHM
// extension is present, falling back to GetImage. Wayland has no direct
// pixel access for unprivileged clients; captures go through the
// org.freedesktop.portal.Screenshot portal as a synchronous session-bus
// round trip.

mod wayland;
mod x11;

use std::env;
use std::sync::Mutex;

use crate::error::{CaptureError, Result};
use crate::imageops;
use crate::types::{DisplayInfo, Frame, Rect, WindowHandle};

use super::CaptureBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisplayServer {
    X11,
    Wayland,
}

/// Which display server the session runs under.
///
/// A Wayland socket wins over an X11 `DISPLAY`: XWayland exports both,
/// and the portal is the only path that sees native Wayland surfaces.
fn detect_display_server() -> DisplayServer {
    let wayland_socket = env::var("WAYLAND_DISPLAY")
        .map(|v| !v.is_empty())
        .unwrap_or(false);
    let session_type = env::var("XDG_SESSION_TYPE").unwrap_or_default();

    if wayland_socket || session_type.eq_ignore_ascii_case("wayland") {
        DisplayServer::Wayland
    } else {
        DisplayServer::X11
    }
}

pub struct LinuxCapture {
    server: DisplayServer,
    x11: Option<x11::X11Capture>,
    method: &'static str,
    last_error: Mutex<String>,
}

impl LinuxCapture {
    pub fn new() -> Result<Self> {
        let server = detect_display_server();
        log::debug!("display server detected: {server:?}");

        let x11 = match server {
            DisplayServer::X11 => Some(x11::X11Capture::connect().map_err(|e| {
                CaptureError::ResourceFailure(format!("X11 connection failed: {e}"))
            })?),
            DisplayServer::Wayland => None,
        };

        Ok(LinuxCapture {
            server,
            x11,
            method: "none",
            last_error: Mutex::new(String::new()),
        })
    }

    fn set_last_error(&self, message: String) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = message;
        }
    }

    fn record<T>(&mut self, method: &'static str, result: anyhow::Result<T>) -> Result<T>
    where
        T: Sized,
    {
        match result {
            Ok(value) => {
                self.method = method;
                Ok(value)
            }
            Err(err) => {
                let err = CaptureError::ResourceFailure(err.to_string());
                self.set_last_error(err.to_string());
                Err(err)
            }
        }
    }
}

impl CaptureBackend for LinuxCapture {
    fn capture_full_screen(&mut self, display_id: i32) -> Result<Frame> {
        match self.server {
            DisplayServer::X11 => {
                let x11 = self.x11.as_mut().ok_or_else(|| {
                    CaptureError::ResourceFailure("X11 connection not open".into())
                })?;
                let result = x11.capture_display(display_id);
                self.record("x11", result)
            }
            DisplayServer::Wayland => {
                // The portal shoots the whole virtual desktop; per-display
                // selection is not part of the screenshot interface.
                let result = wayland::take_screenshot();
                self.record("wayland-portal", result)
            }
        }
    }

    fn capture_window(&mut self, handle: WindowHandle) -> Result<Frame> {
        match self.server {
            DisplayServer::X11 => {
                let x11 = self.x11.as_mut().ok_or_else(|| {
                    CaptureError::ResourceFailure("X11 connection not open".into())
                })?;
                match x11.capture_window(handle as u32) {
                    Ok(frame) => {
                        self.method = "x11";
                        Ok(frame)
                    }
                    Err(err) => {
                        let err = CaptureError::InvalidInput(format!(
                            "window capture failed for {handle:#x}: {err}"
                        ));
                        self.set_last_error(err.to_string());
                        Err(err)
                    }
                }
            }
            DisplayServer::Wayland => {
                let err = CaptureError::BackendUnavailable(
                    "window capture is not available through the Wayland portal".into(),
                );
                self.set_last_error(err.to_string());
                Err(err)
            }
        }
    }

    fn capture_region(&mut self, region: &Rect, _display_id: i32) -> Result<Frame> {
        if !region.is_valid() {
            let err = CaptureError::InvalidInput("empty capture region".into());
            self.set_last_error(err.to_string());
            return Err(err);
        }

        match self.server {
            DisplayServer::X11 => {
                let x11 = self.x11.as_mut().ok_or_else(|| {
                    CaptureError::ResourceFailure("X11 connection not open".into())
                })?;
                let result = x11.capture_root_region(region);
                self.record("x11", result)
            }
            DisplayServer::Wayland => {
                // Emulated: shoot the whole desktop, crop the rect out.
                let result = wayland::take_screenshot().and_then(|frame| crop(frame, region));
                self.record("wayland-portal", result)
            }
        }
    }

    fn displays(&mut self) -> Vec<DisplayInfo> {
        match self.server {
            DisplayServer::X11 => self
                .x11
                .as_mut()
                .map(|x11| x11.displays().unwrap_or_default())
                .unwrap_or_default(),
            DisplayServer::Wayland => {
                // The portal exposes no output enumeration.
                vec![DisplayInfo {
                    id: 0,
                    name: "wayland".into(),
                    bounds: Rect::default(),
                    is_primary: true,
                    refresh_rate: 60,
                    physical_width: None,
                    physical_height: None,
                }]
            }
        }
    }

    fn supports_window_capture(&self) -> bool {
        self.server == DisplayServer::X11
    }

    fn supports_region_capture(&self) -> bool {
        self.server == DisplayServer::X11
    }

    fn capture_method(&self) -> &'static str {
        self.method
    }

    fn last_error(&self) -> String {
        self.last_error
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

/// Crop a BGR frame to the given desktop rect (clamped to the frame).
fn crop(frame: Frame, region: &Rect) -> anyhow::Result<Frame> {
    let x = region.x.max(0) as u32;
    let y = region.y.max(0) as u32;
    if x >= frame.width || y >= frame.height {
        anyhow::bail!("region origin outside the captured desktop");
    }
    let width = region.width.min(frame.width - x);
    let height = region.height.min(frame.height - y);

    let img = imageops::to_dynamic(&frame)?;
    let cropped = img.crop_imm(x, y, width, height);
    Ok(imageops::from_dynamic(cropped, frame.layout)?)
}
