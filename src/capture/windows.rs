// Windows backend: three acquisition tiers behind one face.
//
// Tier 1 is DXGI desktop duplication (hardware path), tier 2 is
// Windows.Graphics.Capture (compositor path), tier 3 is a GDI blit
// (universal path). Full-screen capture walks the tiers in order and
// aggregates the failures of the tiers it passed over; window and
// region capture go straight to GDI, which is the only tier that can
// address those targets directly.

mod duplication;
mod gdi;
mod wgc;

use std::collections::HashSet;
use std::sync::Mutex;

use windows::core::{BOOL, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    CreateDCW, DeleteDC, EnumDisplayMonitors, EnumDisplaySettingsW, GetDeviceCaps,
    GetMonitorInfoW, DEVMODEW, ENUM_CURRENT_SETTINGS, HDC, HMONITOR, HORZSIZE, MONITORINFO,
    MONITORINFOEXW, VERTSIZE,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::UI::HiDpi::{
    SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};

use crate::error::{CaptureError, Result};
use crate::types::{DisplayInfo, Frame, Rect, WindowHandle};

use super::CaptureBackend;

/// Executables known to hold the desktop-duplication slot or otherwise
/// interfere with it. Matched case-insensitively against the process
/// snapshot for diagnostics only.
const KNOWN_CAPTURE_PROCESSES: &[&str] = &[
    "obs64.exe",
    "obs32.exe",
    "obs.exe",
    "xsplit.core.exe",
    "bandicam.exe",
    "fraps.exe",
    "sharex.exe",
    "teamviewer.exe",
    "anydesk.exe",
    "mstsc.exe",
    "rustdesk.exe",
    "parsecd.exe",
    "discord.exe",
    "zoom.exe",
    "teams.exe",
];

/// Windows capture backend.
pub struct WindowsCapture {
    tier1: duplication::DuplicationTier,
    tier2: wgc::WgcTier,
    monitors: Vec<MonitorEntry>,
    method: &'static str,
    last_error: Mutex<String>,
}

struct MonitorEntry {
    /// HMONITOR stored as isize so the entry stays Send-friendly.
    handle: isize,
    info: DisplayInfo,
}

impl WindowsCapture {
    pub fn new() -> Result<Self> {
        enable_dpi_awareness();
        let monitors = enumerate_monitors();
        Ok(WindowsCapture {
            tier1: duplication::DuplicationTier::new(),
            tier2: wgc::WgcTier::new(),
            monitors,
            method: "none",
            last_error: Mutex::new(String::new()),
        })
    }

    /// Whether the hardware duplication tier has not been permanently
    /// refused (access-denied by the compositor or another client).
    pub fn duplication_available(&self) -> bool {
        self.tier1.is_available()
    }

    /// Running processes from the known capture-tool list.
    /// Never called on the capture path.
    pub fn occupying_processes(&self) -> Vec<String> {
        running_processes_matching(KNOWN_CAPTURE_PROCESSES)
    }

    fn set_last_error(&self, message: String) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = message;
        }
    }

    fn monitor_handle(&mut self, display_id: i32) -> Result<HMONITOR> {
        // Id 0 must exist even when enumeration raced a display change.
        if self.monitors.is_empty()
            || display_id < 0
            || display_id as usize >= self.monitors.len()
        {
            self.monitors = enumerate_monitors();
        }
        self.monitors
            .get(display_id.max(0) as usize)
            .map(|m| HMONITOR(m.handle as *mut _))
            .ok_or_else(|| {
                CaptureError::InvalidInput(format!(
                    "display id {display_id} out of range ({} attached)",
                    self.monitors.len()
                ))
            })
    }

    fn monitor_bounds(&self, display_id: i32) -> Option<Rect> {
        self.monitors
            .get(display_id.max(0) as usize)
            .map(|m| m.info.bounds)
    }
}

impl CaptureBackend for WindowsCapture {
    fn capture_full_screen(&mut self, display_id: i32) -> Result<Frame> {
        let hmonitor = self.monitor_handle(display_id)?;
        let mut failures: Vec<String> = Vec::new();

        // Tier 1: desktop duplication. Skipped entirely once the OS
        // answered access-denied; that state holds until the occupying
        // process goes away and this backend is recreated.
        if self.tier1.is_available() {
            match self.tier1.capture(display_id) {
                Ok(frame) => {
                    self.method = "duplication";
                    return Ok(frame);
                }
                Err(err) => {
                    log::debug!("duplication tier failed: {err}");
                    failures.push(format!("duplication: {err}"));
                }
            }
        } else {
            failures.push("duplication: marked unavailable".into());
        }

        // Tier 2: Windows.Graphics.Capture.
        if self.tier2.is_usable() {
            match self.tier2.capture(hmonitor, display_id) {
                Ok(frame) => {
                    self.method = "wgc";
                    return Ok(frame);
                }
                Err(err) => {
                    log::debug!("wgc tier failed: {err}");
                    failures.push(format!("wgc: {err}"));
                }
            }
        } else {
            failures.push("wgc: initialization previously failed".into());
        }

        // Tier 3: GDI blit of the monitor's bounding rectangle.
        let bounds = self
            .monitor_bounds(display_id)
            .ok_or_else(|| CaptureError::InvalidInput(format!("display id {display_id} vanished")))?;
        match gdi::capture_screen_rect(bounds.x, bounds.y, bounds.width, bounds.height) {
            Ok(frame) => {
                if !failures.is_empty() {
                    log::warn!("fell through to gdi blit: {}", failures.join("; "));
                    self.set_last_error(failures.join("; "));
                }
                self.method = "gdi";
                Ok(frame)
            }
            Err(err) => {
                failures.push(format!("gdi: {err}"));
                let message = failures.join("; ");
                self.set_last_error(message.clone());
                Err(CaptureError::ResourceFailure(message))
            }
        }
    }

    fn capture_window(&mut self, handle: WindowHandle) -> Result<Frame> {
        match gdi::capture_window(handle) {
            Ok(frame) => {
                self.method = "gdi";
                Ok(frame)
            }
            Err(err) => {
                self.set_last_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Region capture addresses the virtual desktop directly; the
    /// `display_id` argument is accepted for interface symmetry but not
    /// consulted, so rects on monitors with a non-zero origin must be
    /// given in virtual-desktop coordinates.
    fn capture_region(&mut self, region: &Rect, _display_id: i32) -> Result<Frame> {
        if !region.is_valid() {
            let err = CaptureError::InvalidInput("empty capture region".into());
            self.set_last_error(err.to_string());
            return Err(err);
        }
        match gdi::capture_screen_rect(region.x, region.y, region.width, region.height) {
            Ok(frame) => {
                self.method = "gdi";
                Ok(frame)
            }
            Err(err) => {
                self.set_last_error(err.to_string());
                Err(err)
            }
        }
    }

    fn displays(&mut self) -> Vec<DisplayInfo> {
        self.monitors = enumerate_monitors();
        self.monitors.iter().map(|m| m.info.clone()).collect()
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

// ---------------------------------------------------------------------------
// DPI
// ---------------------------------------------------------------------------

/// Enable Per-Monitor DPI awareness so captures carry physical pixels.
///
/// Repeated calls are safe (silently ignored if already set).
fn enable_dpi_awareness() {
    unsafe {
        // SAFETY: best-effort call, failure indicates it was already set
        let _ = SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2);
    }
}

// ---------------------------------------------------------------------------
// Monitor enumeration
// ---------------------------------------------------------------------------

fn enumerate_monitors() -> Vec<MonitorEntry> {
    let mut handles: Vec<(isize, MONITORINFOEXW)> = Vec::new();

    unsafe {
        let _ = EnumDisplayMonitors(
            Some(HDC::default()),
            None,
            Some(enum_monitor_proc),
            LPARAM(&mut handles as *mut _ as isize),
        );
    }

    handles
        .into_iter()
        .enumerate()
        .map(|(index, (handle, info))| {
            let device_name: Vec<u16> = info.szDevice.to_vec();
            let name = String::from_utf16_lossy(&info.szDevice)
                .trim_end_matches('\0')
                .to_string();
            let rc = info.monitorInfo.rcMonitor;
            // MONITORINFOF_PRIMARY == 1
            let is_primary = (info.monitorInfo.dwFlags & 1) != 0;

            let refresh_rate = query_refresh_rate(&device_name).unwrap_or(60);
            let (physical_width, physical_height) = query_physical_size(&device_name);

            MonitorEntry {
                handle,
                info: DisplayInfo {
                    id: index as u32,
                    name,
                    bounds: Rect::new(
                        rc.left,
                        rc.top,
                        (rc.right - rc.left).max(0) as u32,
                        (rc.bottom - rc.top).max(0) as u32,
                    ),
                    is_primary,
                    refresh_rate,
                    physical_width,
                    physical_height,
                },
            }
        })
        .collect()
}

unsafe extern "system" fn enum_monitor_proc(
    hmonitor: HMONITOR,
    _: HDC,
    _: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    // SAFETY: lparam points to the Vec on the caller's stack; the callback
    // runs synchronously on the same thread for the duration of the call.
    let handles = &mut *(lparam.0 as *mut Vec<(isize, MONITORINFOEXW)>);

    let mut info = MONITORINFOEXW {
        monitorInfo: MONITORINFO {
            cbSize: std::mem::size_of::<MONITORINFOEXW>() as u32,
            ..Default::default()
        },
        ..Default::default()
    };

    if GetMonitorInfoW(hmonitor, &mut info.monitorInfo as *mut _ as *mut _).as_bool() {
        handles.push((hmonitor.0 as isize, info));
    }

    BOOL(1)
}

/// Current mode refresh rate for a GDI device name.
fn query_refresh_rate(device_name: &[u16]) -> Option<u32> {
    unsafe {
        let mut devmode = DEVMODEW {
            dmSize: std::mem::size_of::<DEVMODEW>() as u16,
            ..Default::default()
        };
        // SAFETY: device_name is a NUL-terminated UTF-16 buffer from
        // MONITORINFOEXW, alive for the duration of the call.
        let ok = EnumDisplaySettingsW(
            PCWSTR(device_name.as_ptr()),
            ENUM_CURRENT_SETTINGS,
            &mut devmode,
        );
        if ok.as_bool() && devmode.dmDisplayFrequency > 1 {
            Some(devmode.dmDisplayFrequency)
        } else {
            None
        }
    }
}

/// Physical dimensions in millimetres, when GDI reports them.
fn query_physical_size(device_name: &[u16]) -> (Option<u32>, Option<u32>) {
    unsafe {
        // SAFETY: CreateDCW with a display device name; the DC is deleted
        // on every path below.
        let hdc = CreateDCW(
            PCWSTR::null(),
            PCWSTR(device_name.as_ptr()),
            PCWSTR::null(),
            None,
        );
        if hdc.is_invalid() {
            return (None, None);
        }
        let width = GetDeviceCaps(Some(hdc), HORZSIZE);
        let height = GetDeviceCaps(Some(hdc), VERTSIZE);
        let _ = DeleteDC(hdc);
        (
            (width > 0).then_some(width as u32),
            (height > 0).then_some(height as u32),
        )
    }
}

// ---------------------------------------------------------------------------
// Occupancy diagnostics
// ---------------------------------------------------------------------------

/// Intersect the running-process snapshot with a name list.
fn running_processes_matching(names: &[&str]) -> Vec<String> {
    let targets: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
    let mut matched = Vec::new();

    unsafe {
        // SAFETY: Win32 API call, HANDLE must be closed after use.
        let snapshot = match CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) {
            Ok(handle) => handle,
            Err(err) => {
                log::debug!("process snapshot failed: {err}");
                return matched;
            }
        };

        // RAII guard: CloseHandle on drop, even if we return early.
        struct SnapshotGuard(HANDLE);
        impl Drop for SnapshotGuard {
            fn drop(&mut self) {
                // SAFETY: self.0 is a valid snapshot handle.
                unsafe {
                    let _ = CloseHandle(self.0);
                }
            }
        }
        let _guard = SnapshotGuard(snapshot);

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                let name = String::from_utf16_lossy(&entry.szExeFile)
                    .trim_end_matches('\0')
                    .to_lowercase();

                if targets.contains(&name) && !matched.contains(&name) {
                    matched.push(name);
                }

                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
    }

    matched
}

// ---------------------------------------------------------------------------
// Shared pixel plumbing for the tiers
// ---------------------------------------------------------------------------

/// Strip row pitch and drop alpha: mapped BGRA rows → tight BGR frame.
fn bgra_rows_to_bgr_frame(
    src: *const u8,
    row_pitch: usize,
    width: u32,
    height: u32,
) -> Frame {
    use crate::types::PixelLayout;

    let mut frame = Frame::allocate(width, height, PixelLayout::Bgr24, 0);
    let dst_row = width as usize * 3;

    for y in 0..height as usize {
        // SAFETY: caller guarantees `src` covers `row_pitch * height`
        // bytes of mapped memory for the duration of this call.
        let row = unsafe { std::slice::from_raw_parts(src.add(y * row_pitch), width as usize * 4) };
        let dst = &mut frame.data[y * dst_row..(y + 1) * dst_row];
        for x in 0..width as usize {
            dst[x * 3] = row[x * 4];
            dst[x * 3 + 1] = row[x * 4 + 1];
            dst[x * 3 + 2] = row[x * 4 + 2];
        }
    }

    frame
}
