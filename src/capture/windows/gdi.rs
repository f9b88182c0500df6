// Tier 3: GDI blit. The universal path: works in remote sessions, VMs
// without a GPU, and for window/region targets the other tiers cannot
// address. Reads pixels through a top-down 24-bit DIB.

use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
    GetDIBits, GetWindowDC, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    DIB_RGB_COLORS, HBITMAP, HDC, SRCCOPY,
};
use windows::Win32::Storage::Xps::{PrintWindow, PRINT_WINDOW_FLAGS};
use windows::Win32::UI::WindowsAndMessaging::{
    GetWindowRect, IsIconic, IsWindow, IsWindowVisible,
};

use crate::error::{CaptureError, Result};
use crate::types::{Frame, PixelLayout, WindowHandle};

/// Render the full window content including layered surfaces.
/// Not named in the metadata; documented as PW_RENDERFULLCONTENT.
const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(2);

/// Windows larger than this per axis are treated as invalid handles.
const MAX_WINDOW_EXTENT: i32 = 10_000;

/// Blit a virtual-desktop rectangle from the screen DC.
pub(super) fn capture_screen_rect(x: i32, y: i32, width: u32, height: u32) -> Result<Frame> {
    if width == 0 || height == 0 {
        return Err(CaptureError::InvalidInput("empty blit extent".into()));
    }

    unsafe {
        let screen_dc = GetDC(None);
        if screen_dc.is_invalid() {
            return Err(CaptureError::ResourceFailure("GetDC(NULL) failed".into()));
        }

        // Guard closure so every GDI object is released on each path.
        let result = blit_from_dc(screen_dc, x, y, width, height);

        ReleaseDC(None, screen_dc);
        result
    }
}

/// Capture a window: PrintWindow first, BitBlt from the window DC as
/// the fallback for windows that refuse to render themselves.
pub(super) fn capture_window(handle: WindowHandle) -> Result<Frame> {
    let hwnd = HWND(handle as *mut _);
    let (width, height) = validate_window(hwnd)?;

    unsafe {
        let window_dc = GetWindowDC(Some(hwnd));
        if window_dc.is_invalid() {
            return Err(CaptureError::ResourceFailure("GetWindowDC failed".into()));
        }

        let result = (|| -> Result<Frame> {
            let mem_dc = CreateCompatibleDC(Some(window_dc));
            if mem_dc.is_invalid() {
                return Err(CaptureError::ResourceFailure(
                    "CreateCompatibleDC failed".into(),
                ));
            }

            let result = (|| -> Result<Frame> {
                let bitmap = CreateCompatibleBitmap(window_dc, width as i32, height as i32);
                if bitmap.is_invalid() {
                    return Err(CaptureError::ResourceFailure(
                        "CreateCompatibleBitmap failed".into(),
                    ));
                }
                let old = SelectObject(mem_dc, bitmap.into());

                let printed = PrintWindow(hwnd, mem_dc, PW_RENDERFULLCONTENT).as_bool();
                if !printed {
                    log::debug!("PrintWindow refused; falling back to BitBlt");
                    if BitBlt(
                        mem_dc,
                        0,
                        0,
                        width as i32,
                        height as i32,
                        Some(window_dc),
                        0,
                        0,
                        SRCCOPY,
                    )
                    .is_err()
                    {
                        SelectObject(mem_dc, old);
                        let _ = DeleteObject(bitmap.into());
                        return Err(CaptureError::ResourceFailure(
                            "window BitBlt failed".into(),
                        ));
                    }
                }

                let frame = read_dib(mem_dc, bitmap, width, height);
                SelectObject(mem_dc, old);
                let _ = DeleteObject(bitmap.into());
                frame
            })();

            let _ = DeleteDC(mem_dc);
            result
        })();

        ReleaseDC(Some(hwnd), window_dc);
        result
    }
}

/// Window must exist, be visible, not minimized, and have a sane extent.
fn validate_window(hwnd: HWND) -> Result<(u32, u32)> {
    unsafe {
        if !IsWindow(Some(hwnd)).as_bool() {
            return Err(CaptureError::InvalidInput(format!(
                "invalid window handle {:?}",
                hwnd.0
            )));
        }
        if !IsWindowVisible(hwnd).as_bool() {
            return Err(CaptureError::InvalidInput("window is not visible".into()));
        }
        if IsIconic(hwnd).as_bool() {
            return Err(CaptureError::InvalidInput("window is minimized".into()));
        }

        let mut rect = RECT::default();
        if GetWindowRect(hwnd, &mut rect).is_err() {
            return Err(CaptureError::InvalidInput("GetWindowRect failed".into()));
        }

        let width = rect.right - rect.left;
        let height = rect.bottom - rect.top;
        if width <= 0 || height <= 0 || width >= MAX_WINDOW_EXTENT || height >= MAX_WINDOW_EXTENT {
            return Err(CaptureError::InvalidInput(format!(
                "implausible window extent {width}x{height}"
            )));
        }

        Ok((width as u32, height as u32))
    }
}

/// Memory DC + compatible bitmap + BitBlt from `src_dc` at `(x, y)`.
unsafe fn blit_from_dc(src_dc: HDC, x: i32, y: i32, width: u32, height: u32) -> Result<Frame> {
    let mem_dc = CreateCompatibleDC(Some(src_dc));
    if mem_dc.is_invalid() {
        return Err(CaptureError::ResourceFailure(
            "CreateCompatibleDC failed".into(),
        ));
    }

    let result = (|| -> Result<Frame> {
        let bitmap = CreateCompatibleBitmap(src_dc, width as i32, height as i32);
        if bitmap.is_invalid() {
            return Err(CaptureError::ResourceFailure(
                "CreateCompatibleBitmap failed".into(),
            ));
        }

        let old = SelectObject(mem_dc, bitmap.into());

        let blit = BitBlt(
            mem_dc,
            0,
            0,
            width as i32,
            height as i32,
            Some(src_dc),
            x,
            y,
            SRCCOPY,
        );
        let frame = if blit.is_ok() {
            read_dib(mem_dc, bitmap, width, height)
        } else {
            Err(CaptureError::ResourceFailure("BitBlt failed".into()))
        };

        SelectObject(mem_dc, old);
        let _ = DeleteObject(bitmap.into());
        frame
    })();

    let _ = DeleteDC(mem_dc);
    result
}

/// Read the bitmap as 24-bit top-down BGR and repack the DWORD-aligned
/// rows into a tight frame.
unsafe fn read_dib(mem_dc: HDC, bitmap: HBITMAP, width: u32, height: u32) -> Result<Frame> {
    // Rows of a 24-bit DIB are padded to 4-byte boundaries.
    let padded_row = ((width as usize * 3) + 3) & !3;
    let mut padded = vec![0u8; padded_row * height as usize];

    let bmi = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width as i32,
            // Negative height = top-down rows.
            biHeight: -(height as i32),
            biPlanes: 1,
            biBitCount: 24,
            biCompression: BI_RGB.0,
            ..Default::default()
        },
        ..Default::default()
    };

    let lines = GetDIBits(
        mem_dc,
        bitmap,
        0,
        height,
        Some(padded.as_mut_ptr() as *mut _),
        &bmi as *const _ as *mut _,
        DIB_RGB_COLORS,
    );
    if lines == 0 {
        return Err(CaptureError::ResourceFailure("GetDIBits failed".into()));
    }

    let mut frame = Frame::allocate(width, height, PixelLayout::Bgr24, 0);
    let tight_row = width as usize * 3;
    for y in 0..height as usize {
        frame.data[y * tight_row..(y + 1) * tight_row]
            .copy_from_slice(&padded[y * padded_row..y * padded_row + tight_row]);
    }

    Ok(frame)
}
