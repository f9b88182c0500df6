// X11 capture via x11rb.
//
// Pixels come from XShmGetImage into a SysV shared-memory segment when
// the MIT-SHM extension is present; GetImage over the wire otherwise.
// Outputs are enumerated through RandR CRTCs.

use anyhow::{bail, Context, Result};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::randr::ConnectionExt as RandrConnectionExt;
use x11rb::protocol::shm::{self, ConnectionExt as ShmConnectionExt};
use x11rb::protocol::xproto::{self, ConnectionExt, ImageFormat};
use x11rb::rust_connection::RustConnection;

use crate::types::{DisplayInfo, Frame, PixelLayout, Rect};

pub(super) struct X11Capture {
    conn: RustConnection,
    screen_num: usize,
    has_shm: bool,
    shm: Option<ShmBuffer>,
}

/// SysV segment shared with the X server.
struct ShmBuffer {
    seg: shm::Seg,
    shmid: i32,
    ptr: *mut u8,
    size: usize,
    attached: bool,
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/shmid were produced by shmat/shmget and are
        // detached exactly once here.
        unsafe {
            if !self.ptr.is_null() {
                libc::shmdt(self.ptr as *const _);
            }
            if self.shmid >= 0 {
                libc::shmctl(self.shmid, libc::IPC_RMID, std::ptr::null_mut());
            }
        }
    }
}

impl X11Capture {
    pub(super) fn connect() -> Result<Self> {
        let (conn, screen_num) =
            RustConnection::connect(None).context("failed to connect to the X11 display")?;

        let has_shm = conn
            .extension_information(shm::X11_EXTENSION_NAME)
            .context("extension query failed")?
            .is_some()
            && conn
                .shm_query_version()
                .map(|cookie| cookie.reply().is_ok())
                .unwrap_or(false);

        log::debug!("X11 connected, MIT-SHM {}", if has_shm { "present" } else { "absent" });

        Ok(X11Capture {
            conn,
            screen_num,
            has_shm,
            shm: None,
        })
    }

    fn root(&self) -> xproto::Window {
        self.conn.setup().roots[self.screen_num].root
    }

    /// Capture the bounds of the display with the given dense id.
    pub(super) fn capture_display(&mut self, display_id: i32) -> Result<Frame> {
        let displays = self.displays()?;
        let display = displays
            .get(display_id.max(0) as usize)
            .with_context(|| format!("display id {display_id} out of range"))?;
        let bounds = display.bounds;
        self.capture_root_region(&bounds)
    }

    /// Capture a rect of the root window (virtual-desktop coordinates).
    pub(super) fn capture_root_region(&mut self, region: &Rect) -> Result<Frame> {
        let root = self.root();
        self.capture_drawable(root, region.x, region.y, region.width, region.height)
    }

    /// Capture a window's own content.
    pub(super) fn capture_window(&mut self, window: u32) -> Result<Frame> {
        let geometry = self
            .conn
            .get_geometry(window)
            .context("get_geometry request failed")?
            .reply()
            .context("window does not exist")?;
        self.capture_drawable(window, 0, 0, geometry.width as u32, geometry.height as u32)
    }

    fn capture_drawable(
        &mut self,
        drawable: impl Into<xproto::Drawable>,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Frame> {
        if width == 0 || height == 0 {
            bail!("empty capture extent");
        }
        let drawable = drawable.into();

        let (pixels, depth) = if self.has_shm {
            match self.shm_get_image(drawable, x, y, width, height) {
                Ok(result) => result,
                Err(err) => {
                    log::debug!("XShmGetImage failed ({err}); falling back to GetImage");
                    self.plain_get_image(drawable, x, y, width, height)?
                }
            }
        } else {
            self.plain_get_image(drawable, x, y, width, height)?
        };

        pixels_to_bgr(&pixels, width, height, depth)
    }

    fn plain_get_image(
        &self,
        drawable: xproto::Drawable,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<(Vec<u8>, u8)> {
        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                drawable,
                x as i16,
                y as i16,
                width as u16,
                height as u16,
                !0, // all planes
            )
            .context("GetImage request failed")?
            .reply()
            .context("GetImage failed")?;
        Ok((reply.data, reply.depth))
    }

    fn shm_get_image(
        &mut self,
        drawable: xproto::Drawable,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<(Vec<u8>, u8)> {
        // Worst case 4 bytes per pixel.
        let needed = width as usize * height as usize * 4;
        self.ensure_shm(needed)?;
        let shm_buffer = self.shm.as_ref().context("shm segment missing")?;

        let reply = self
            .conn
            .shm_get_image(
                drawable,
                x as i16,
                y as i16,
                width as u16,
                height as u16,
                !0,
                ImageFormat::Z_PIXMAP.into(),
                shm_buffer.seg,
                0,
            )
            .context("ShmGetImage request failed")?
            .reply()
            .context("ShmGetImage failed")?;

        let size = (reply.size as usize).min(shm_buffer.size);
        // SAFETY: the server wrote `reply.size` bytes into the attached
        // segment; we copy out no more than the segment length.
        let pixels = unsafe { std::slice::from_raw_parts(shm_buffer.ptr, size).to_vec() };
        Ok((pixels, reply.depth))
    }

    /// (Re)create the shared segment when the needed size grows.
    fn ensure_shm(&mut self, size: usize) -> Result<()> {
        if let Some(buffer) = &self.shm {
            if buffer.size >= size {
                return Ok(());
            }
        }

        // Retire the old segment, both server- and client-side.
        if let Some(old) = self.shm.take() {
            if old.attached {
                let _ = self.conn.shm_detach(old.seg);
            }
        }

        // SAFETY: plain SysV shm allocation; ids and pointers are checked
        // before use and owned by ShmBuffer from here on.
        let (shmid, ptr) = unsafe {
            let shmid = libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600);
            if shmid < 0 {
                bail!("shmget failed");
            }
            let ptr = libc::shmat(shmid, std::ptr::null(), 0);
            if ptr as isize == -1 {
                libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
                bail!("shmat failed");
            }
            (shmid, ptr as *mut u8)
        };

        let seg = self.conn.generate_id().context("id allocation failed")?;
        let mut buffer = ShmBuffer {
            seg,
            shmid,
            ptr,
            size,
            attached: false,
        };

        self.conn
            .shm_attach(seg, shmid as u32, false)
            .context("ShmAttach request failed")?
            .check()
            .context("server refused the shm segment")?;
        buffer.attached = true;

        self.shm = Some(buffer);
        Ok(())
    }

    /// Enumerate outputs through RandR CRTCs.
    pub(super) fn displays(&mut self) -> Result<Vec<DisplayInfo>> {
        let root = self.root();
        let resources = self
            .conn
            .randr_get_screen_resources_current(root)
            .context("RandR resources request failed")?
            .reply()
            .context("RandR resources failed")?;

        let primary_output = self
            .conn
            .randr_get_output_primary(root)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .map(|reply| reply.output);

        let mut displays = Vec::new();

        for crtc in &resources.crtcs {
            let info = match self
                .conn
                .randr_get_crtc_info(*crtc, resources.config_timestamp)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
            {
                Some(info) if info.width > 0 && info.height > 0 => info,
                _ => continue,
            };

            let is_primary = match primary_output {
                Some(primary) => info.outputs.contains(&primary),
                None => displays.is_empty(),
            };

            let refresh_rate = resources
                .modes
                .iter()
                .find(|mode| mode.id == u32::from(info.mode))
                .and_then(|mode| {
                    let denom = mode.htotal as u64 * mode.vtotal as u64;
                    (denom > 0).then(|| (mode.dot_clock as u64 + denom / 2) / denom)
                })
                .unwrap_or(60) as u32;

            let (name, physical) = info
                .outputs
                .first()
                .and_then(|output| {
                    self.conn
                        .randr_get_output_info(*output, resources.config_timestamp)
                        .ok()
                        .and_then(|cookie| cookie.reply().ok())
                })
                .map(|output_info| {
                    let name = String::from_utf8_lossy(&output_info.name).into_owned();
                    let physical = (
                        (output_info.mm_width > 0).then_some(output_info.mm_width),
                        (output_info.mm_height > 0).then_some(output_info.mm_height),
                    );
                    (name, physical)
                })
                .unwrap_or_else(|| (format!("crtc-{}", u32::from(*crtc)), (None, None)));

            displays.push(DisplayInfo {
                id: displays.len() as u32,
                name,
                bounds: Rect::new(
                    info.x as i32,
                    info.y as i32,
                    info.width as u32,
                    info.height as u32,
                ),
                is_primary,
                refresh_rate,
                physical_width: physical.0,
                physical_height: physical.1,
            });
        }

        // Headless or RandR-less servers: the whole root is one display.
        if displays.is_empty() {
            let screen = &self.conn.setup().roots[self.screen_num];
            displays.push(DisplayInfo {
                id: 0,
                name: "screen-0".into(),
                bounds: Rect::new(
                    0,
                    0,
                    screen.width_in_pixels as u32,
                    screen.height_in_pixels as u32,
                ),
                is_primary: true,
                refresh_rate: 60,
                physical_width: (screen.width_in_millimeters > 0)
                    .then_some(screen.width_in_millimeters as u32),
                physical_height: (screen.height_in_millimeters > 0)
                    .then_some(screen.height_in_millimeters as u32),
            });
        }

        Ok(displays)
    }
}

impl Drop for X11Capture {
    fn drop(&mut self) {
        if let Some(buffer) = self.shm.take() {
            if buffer.attached {
                let _ = self.conn.shm_detach(buffer.seg);
            }
            // ShmBuffer::drop handles the client side.
        }
    }
}

/// Z-pixmap bytes → tight BGR24.
///
/// Depth 24/32 arrives as 4-byte BGRx little-endian; depth 16 as RGB565.
fn pixels_to_bgr(data: &[u8], width: u32, height: u32, depth: u8) -> Result<Frame> {
    let pixel_count = width as usize * height as usize;
    let mut frame = Frame::allocate(width, height, PixelLayout::Bgr24, 0);

    match depth {
        24 | 32 => {
            if data.len() < pixel_count * 4 {
                bail!("short pixel buffer for depth {depth}");
            }
            for i in 0..pixel_count {
                let src = &data[i * 4..i * 4 + 3];
                frame.data[i * 3..i * 3 + 3].copy_from_slice(src);
            }
        }
        16 => {
            if data.len() < pixel_count * 2 {
                bail!("short pixel buffer for depth 16");
            }
            for i in 0..pixel_count {
                let px = u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]);
                let r = ((px >> 11) & 0x1F) as u8;
                let g = ((px >> 5) & 0x3F) as u8;
                let b = (px & 0x1F) as u8;
                frame.data[i * 3] = (b << 3) | (b >> 2);
                frame.data[i * 3 + 1] = (g << 2) | (g >> 4);
                frame.data[i * 3 + 2] = (r << 3) | (r >> 2);
            }
        }
        other => bail!("unsupported X11 pixel depth: {other}"),
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth24_drops_pad_byte() {
        // Two pixels of BGRx.
        let data = [10, 20, 30, 0, 40, 50, 60, 0];
        let frame = pixels_to_bgr(&data, 2, 1, 24).unwrap();
        assert_eq!(frame.data, vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn depth16_expands_rgb565() {
        // Pure red in RGB565: 0xF800.
        let data = 0xF800u16.to_le_bytes();
        let frame = pixels_to_bgr(&data, 1, 1, 16).unwrap();
        assert_eq!(frame.data, vec![0, 0, 255]);
    }

    #[test]
    fn unknown_depth_is_rejected() {
        assert!(pixels_to_bgr(&[0; 8], 1, 1, 8).is_err());
    }
}
