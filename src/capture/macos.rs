// macOS backend: CoreGraphics display services.
//
// Full-screen and region captures come from CGDisplayCreateImage; window
// captures from the window-list image API. CGImage rows are in whatever
// format the WindowServer favors, so pixels are extracted by drawing the
// image into a CPU-addressable BGRA bitmap context and reading that
// buffer back. Captures require the screen-recording TCC permission on
// 10.15+.

use std::sync::Mutex;

use anyhow::{bail, Context, Result as AnyResult};
use core_graphics::access::ScreenCaptureAccess;
use core_graphics::base::{kCGBitmapByteOrder32Little, kCGImageAlphaPremultipliedFirst};
use core_graphics::color_space::CGColorSpace;
use core_graphics::context::CGContext;
use core_graphics::display::CGDisplay;
use core_graphics::geometry::{CGPoint, CGRect, CGSize};
use core_graphics::image::CGImage;
use core_graphics::window::{
    create_image, kCGWindowImageBoundsIgnoreFraming, kCGWindowListOptionIncludingWindow,
};

use crate::error::{CaptureError, Result};
use crate::types::{DisplayInfo, Frame, PixelLayout, Rect, WindowHandle};

use super::CaptureBackend;

/// Error string every capture carries while the TCC permission is denied.
const PERMISSION_DENIED: &str = "screen recording permission denied";

#[allow(non_snake_case)]
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    /// Physical size in millimetres; zero size when unknown.
    fn CGDisplayScreenSize(display: u32) -> CGSize;
}

pub struct MacosCapture {
    /// Active display ids, primary first.
    displays: Vec<u32>,
    method: &'static str,
    last_error: Mutex<String>,
}

impl MacosCapture {
    pub fn new() -> Result<Self> {
        let displays = ordered_display_ids();
        Ok(MacosCapture {
            displays,
            method: "none",
            last_error: Mutex::new(String::new()),
        })
    }

    /// Whether the screen-recording TCC permission has been granted.
    /// Never pops the system dialog.
    pub fn check_screen_recording_permission(&self) -> bool {
        ScreenCaptureAccess.preflight()
    }

    /// Ask the OS for the permission; pops the system dialog on first use.
    pub fn request_screen_recording_permission(&self) -> bool {
        ScreenCaptureAccess.request()
    }

    fn set_last_error(&self, message: String) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = message;
        }
    }

    fn permission_guard(&self) -> Result<()> {
        if self.check_screen_recording_permission() {
            Ok(())
        } else {
            let err = CaptureError::BackendUnavailable(PERMISSION_DENIED.into());
            self.set_last_error(err.to_string());
            Err(err)
        }
    }

    fn display_for_id(&mut self, display_id: i32) -> Result<CGDisplay> {
        if display_id < 0 || display_id as usize >= self.displays.len() {
            self.displays = ordered_display_ids();
        }
        self.displays
            .get(display_id.max(0) as usize)
            .map(|id| CGDisplay::new(*id))
            .ok_or_else(|| {
                CaptureError::InvalidInput(format!(
                    "display id {display_id} out of range ({} attached)",
                    self.displays.len()
                ))
            })
    }
}

impl CaptureBackend for MacosCapture {
    fn capture_full_screen(&mut self, display_id: i32) -> Result<Frame> {
        self.permission_guard()?;
        let display = self.display_for_id(display_id)?;

        let result = display
            .image()
            .context("CGDisplayCreateImage returned null")
            .and_then(|image| cgimage_to_bgr(&image));

        match result {
            Ok(frame) => {
                self.method = "coregraphics";
                Ok(frame)
            }
            Err(err) => {
                let err = CaptureError::ResourceFailure(err.to_string());
                self.set_last_error(err.to_string());
                Err(err)
            }
        }
    }

    fn capture_window(&mut self, handle: WindowHandle) -> Result<Frame> {
        self.permission_guard()?;
        if handle == 0 {
            let err = CaptureError::InvalidInput("null window handle".into());
            self.set_last_error(err.to_string());
            return Err(err);
        }

        // CGRectNull: let the system size the image to the window bounds.
        let null_rect = CGRect::new(
            &CGPoint::new(f64::INFINITY, f64::INFINITY),
            &CGSize::new(0.0, 0.0),
        );

        let result = create_image(
            null_rect,
            kCGWindowListOptionIncludingWindow,
            handle as u32,
            kCGWindowImageBoundsIgnoreFraming,
        )
        .context("CGWindowListCreateImage returned null")
        .and_then(|image| cgimage_to_bgr(&image));

        match result {
            Ok(frame) => {
                self.method = "coregraphics";
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

    fn capture_region(&mut self, region: &Rect, display_id: i32) -> Result<Frame> {
        self.permission_guard()?;
        if !region.is_valid() {
            let err = CaptureError::InvalidInput("empty capture region".into());
            self.set_last_error(err.to_string());
            return Err(err);
        }

        let display = self.display_for_id(display_id)?;
        let rect = CGRect::new(
            &CGPoint::new(region.x as f64, region.y as f64),
            &CGSize::new(region.width as f64, region.height as f64),
        );

        let result = display
            .image_for_rect(rect)
            .context("CGDisplayCreateImageForRect returned null")
            .and_then(|image| cgimage_to_bgr(&image));

        match result {
            Ok(frame) => {
                self.method = "coregraphics";
                Ok(frame)
            }
            Err(err) => {
                let err = CaptureError::ResourceFailure(err.to_string());
                self.set_last_error(err.to_string());
                Err(err)
            }
        }
    }

    fn displays(&mut self) -> Vec<DisplayInfo> {
        self.displays = ordered_display_ids();
        self.displays
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let display = CGDisplay::new(*id);
                let bounds = display.bounds();
                let refresh_rate = display
                    .display_mode()
                    .map(|mode| mode.refresh_rate().round() as u32)
                    .filter(|rate| *rate > 0)
                    .unwrap_or(60);

                // SAFETY: plain value-returning query for a display id we
                // just enumerated.
                let physical = unsafe { CGDisplayScreenSize(*id) };

                DisplayInfo {
                    id: index as u32,
                    name: format!("display-{id}"),
                    bounds: Rect::new(
                        bounds.origin.x as i32,
                        bounds.origin.y as i32,
                        bounds.size.width as u32,
                        bounds.size.height as u32,
                    ),
                    is_primary: display.is_main(),
                    refresh_rate,
                    physical_width: (physical.width > 0.0).then(|| physical.width.round() as u32),
                    physical_height: (physical.height > 0.0)
                        .then(|| physical.height.round() as u32),
                }
            })
            .collect()
    }

    fn supports_window_capture(&self) -> bool {
        true
    }

    fn supports_region_capture(&self) -> bool {
        true
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

/// Active display ids with the main display first, so id 0 is primary.
fn ordered_display_ids() -> Vec<u32> {
    let mut ids = CGDisplay::active_displays().unwrap_or_default();
    let main_id = CGDisplay::main().id;
    ids.sort_by_key(|id| if *id == main_id { 0 } else { 1 });
    ids
}

/// Render a CGImage into a BGRA bitmap context and repack to BGR.
fn cgimage_to_bgr(image: &CGImage) -> AnyResult<Frame> {
    let width = image.width();
    let height = image.height();
    if width == 0 || height == 0 {
        bail!("captured image has zero extent");
    }

    let bytes_per_row = width * 4;
    let color_space = CGColorSpace::create_device_rgb();

    // Little-endian 32-bit with premultiplied alpha first = BGRA in memory.
    let mut context = CGContext::create_bitmap_context(
        None,
        width,
        height,
        8,
        bytes_per_row,
        &color_space,
        kCGBitmapByteOrder32Little | kCGImageAlphaPremultipliedFirst,
    );

    let rect = CGRect::new(
        &CGPoint::new(0.0, 0.0),
        &CGSize::new(width as f64, height as f64),
    );
    context.draw_image(rect, image);

    let data = context.data();
    if data.len() < bytes_per_row * height {
        bail!("bitmap context returned a short buffer");
    }

    let mut frame = Frame::allocate(width as u32, height as u32, PixelLayout::Bgr24, 0);
    for i in 0..width * height {
        frame.data[i * 3] = data[i * 4];
        frame.data[i * 3 + 1] = data[i * 4 + 1];
        frame.data[i * 3 + 2] = data[i * 4 + 2];
    }

    Ok(frame)
}
