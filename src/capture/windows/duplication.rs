// Tier 1: DXGI desktop duplication.
//
// Owns a hardware D3D11 device, the duplication interface for one output,
// and a pair of CPU-readable staging textures. The tier is a small state
// machine: access-denied at DuplicateOutput time parks it permanently,
// ACCESS_LOST during acquire tears resources down for a lazy
// reinitialization on the next call, WAIT_TIMEOUT leaves it ready and
// surfaces a transient no-new-frame failure.

use std::sync::Mutex;

use anyhow::{bail, Context};
use windows::core::Interface;
use windows::Win32::Foundation::{E_ACCESSDENIED, RECT};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_BOX, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIAdapter, IDXGIFactory1, IDXGIOutput, IDXGIOutput1,
    IDXGIOutputDuplication, IDXGIResource, DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT,
};

use crate::error::{CaptureError, Result};
use crate::types::Frame;

/// Dirty-rect copies are only worth issuing when the changed area is a
/// fraction of the frame; beyond this share a full CopyResource wins.
const DIRTY_COPY_MAX_COVERAGE: f64 = 0.5;

enum TierState {
    Uninitialized,
    Ready,
    /// Access denied by the OS; do not retry until process restart.
    Unavailable,
}

struct Resources {
    _device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    staging: [ID3D11Texture2D; 2],
    width: u32,
    height: u32,
}

pub(super) struct DuplicationTier {
    state: TierState,
    resources: Option<Resources>,
    /// Guards the double-buffer slot swap; diagnostic reads may come
    /// from another thread.
    staging_index: Mutex<usize>,
    display_id: i32,
}

impl DuplicationTier {
    pub(super) fn new() -> Self {
        DuplicationTier {
            state: TierState::Uninitialized,
            resources: None,
            staging_index: Mutex::new(0),
            display_id: -1,
        }
    }

    pub(super) fn is_available(&self) -> bool {
        !matches!(self.state, TierState::Unavailable)
    }

    pub(super) fn capture(&mut self, display_id: i32) -> Result<Frame> {
        match self.state {
            TierState::Unavailable => {
                return Err(CaptureError::BackendUnavailable(
                    "desktop duplication marked unavailable".into(),
                ))
            }
            TierState::Uninitialized => self.initialize(display_id)?,
            TierState::Ready => {
                if self.display_id != display_id {
                    self.teardown();
                    self.initialize(display_id)?;
                }
            }
        }

        self.acquire_and_read()
    }

    fn initialize(&mut self, display_id: i32) -> Result<()> {
        match create_duplication(display_id) {
            Ok(resources) => {
                self.resources = Some(resources);
                self.state = TierState::Ready;
                self.display_id = display_id;
                Ok(())
            }
            Err(err) => {
                if is_access_denied(&err) {
                    log::warn!("DuplicateOutput refused with access denied; parking tier 1");
                    self.state = TierState::Unavailable;
                    Err(CaptureError::BackendUnavailable(format!(
                        "desktop duplication access denied: {err}"
                    )))
                } else {
                    Err(CaptureError::ResourceFailure(format!(
                        "desktop duplication init failed: {err}"
                    )))
                }
            }
        }
    }

    fn teardown(&mut self) {
        // COM references release in reverse construction order on drop.
        self.resources = None;
        self.state = TierState::Uninitialized;
    }

    fn acquire_and_read(&mut self) -> Result<Frame> {
        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        // Zero timeout: never block waiting for the compositor.
        let acquired = {
            let resources = self.resources.as_ref().ok_or_else(|| {
                CaptureError::ResourceFailure("duplication not initialized".into())
            })?;
            unsafe {
                resources
                    .duplication
                    .AcquireNextFrame(0, &mut frame_info, &mut resource)
            }
        };

        if let Err(err) = acquired {
            return if err.code() == DXGI_ERROR_WAIT_TIMEOUT {
                Err(CaptureError::BackendTransient("no new frame available".into()))
            } else if err.code() == DXGI_ERROR_ACCESS_LOST {
                log::debug!("duplication access lost; scheduling reinitialization");
                self.teardown();
                Err(CaptureError::BackendTransient(
                    "duplication access lost; will reinitialize".into(),
                ))
            } else {
                Err(CaptureError::ResourceFailure(format!(
                    "AcquireNextFrame failed: {err}"
                )))
            };
        }

        // Frame must be released on every path past this point.
        let result = self.read_acquired_frame(&frame_info, resource);

        if let Some(resources) = self.resources.as_ref() {
            // SAFETY: frame was acquired above on the same duplication.
            unsafe {
                let _ = resources.duplication.ReleaseFrame();
            }
        }

        result
    }

    fn read_acquired_frame(
        &self,
        frame_info: &DXGI_OUTDUPL_FRAME_INFO,
        resource: Option<IDXGIResource>,
    ) -> Result<Frame> {
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| CaptureError::ResourceFailure("duplication not initialized".into()))?;

        let resource = resource
            .ok_or_else(|| CaptureError::ResourceFailure("acquired frame had no resource".into()))?;
        let texture: ID3D11Texture2D = resource
            .cast()
            .map_err(|e| CaptureError::ResourceFailure(format!("frame resource cast: {e}")))?;

        // Swap to the other staging slot under the buffer mutex.
        let slot = {
            let mut guard = self
                .staging_index
                .lock()
                .map_err(|_| CaptureError::ResourceFailure("staging index poisoned".into()))?;
            *guard = (*guard + 1) % resources.staging.len();
            *guard
        };
        let staging = &resources.staging[slot];

        unsafe {
            // Incremental copy when the OS reported a small dirty set and
            // nothing moved; otherwise copy the whole surface.
            let dirty = if frame_info.TotalMetadataBufferSize > 0 {
                collect_dirty_rects(&resources.duplication, frame_info)
            } else {
                None
            };

            match dirty {
                Some(rects)
                    if dirty_coverage(&rects, resources.width, resources.height)
                        <= DIRTY_COPY_MAX_COVERAGE =>
                {
                    for rect in &rects {
                        let src_box = D3D11_BOX {
                            left: rect.left.max(0) as u32,
                            top: rect.top.max(0) as u32,
                            front: 0,
                            right: rect.right.max(0) as u32,
                            bottom: rect.bottom.max(0) as u32,
                            back: 1,
                        };
                        resources.context.CopySubresourceRegion(
                            staging,
                            0,
                            src_box.left,
                            src_box.top,
                            0,
                            &texture,
                            0,
                            Some(&src_box),
                        );
                    }
                }
                _ => resources.context.CopyResource(staging, &texture),
            }

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            resources
                .context
                .Map(staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|e| CaptureError::ResourceFailure(format!("staging map failed: {e}")))?;

            let frame = super::bgra_rows_to_bgr_frame(
                mapped.pData as *const u8,
                mapped.RowPitch as usize,
                resources.width,
                resources.height,
            );

            resources.context.Unmap(staging, 0);

            Ok(frame)
        }
    }
}

/// Dirty rects for the acquired frame, or `None` when anything moved
/// (move rects would need a source-offset copy the staging path skips).
fn collect_dirty_rects(
    duplication: &IDXGIOutputDuplication,
    frame_info: &DXGI_OUTDUPL_FRAME_INFO,
) -> Option<Vec<RECT>> {
    let capacity = frame_info.TotalMetadataBufferSize as usize;
    if capacity == 0 {
        return None;
    }

    unsafe {
        // Move rects come first in the metadata protocol.
        let move_capacity = capacity / std::mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>();
        let mut moves: Vec<DXGI_OUTDUPL_MOVE_RECT> = vec![Default::default(); move_capacity.max(1)];
        let mut moves_required = 0u32;
        if duplication
            .GetFrameMoveRects(
                (moves.len() * std::mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>()) as u32,
                moves.as_mut_ptr(),
                &mut moves_required,
            )
            .is_err()
        {
            return None;
        }
        if moves_required as usize / std::mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>() > 0 {
            return None;
        }

        let rect_capacity = capacity / std::mem::size_of::<RECT>();
        let mut rects: Vec<RECT> = vec![RECT::default(); rect_capacity.max(1)];
        let mut required = 0u32;
        if duplication
            .GetFrameDirtyRects(
                (rects.len() * std::mem::size_of::<RECT>()) as u32,
                rects.as_mut_ptr(),
                &mut required,
            )
            .is_err()
        {
            return None;
        }

        let count = required as usize / std::mem::size_of::<RECT>();
        if count == 0 {
            return None;
        }
        rects.truncate(count);
        Some(rects)
    }
}

fn dirty_coverage(rects: &[RECT], width: u32, height: u32) -> f64 {
    let total = width as f64 * height as f64;
    if total <= 0.0 {
        return 1.0;
    }
    let dirty: f64 = rects
        .iter()
        .map(|r| {
            let w = (r.right - r.left).max(0) as f64;
            let h = (r.bottom - r.top).max(0) as f64;
            w * h
        })
        .sum();
    dirty / total
}

fn is_access_denied(err: &anyhow::Error) -> bool {
    err.downcast_ref::<windows::core::Error>()
        .map(|e| e.code() == E_ACCESSDENIED)
        .unwrap_or(false)
}

/// Create the device on the adapter owning the requested output, then
/// duplicate that output and build the staging pair.
fn create_duplication(display_id: i32) -> anyhow::Result<Resources> {
    if display_id < 0 {
        bail!("display id {display_id} is negative");
    }

    let (adapter, output1) = find_output(display_id as u32)?;

    let (device, context) = unsafe {
        let mut device = None;
        let mut context = None;

        // Hardware feature levels 11.0 then 10.0; BGRA support so the
        // staging format matches the duplication surface.
        D3D11CreateDevice(
            &adapter,
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&[D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_10_0]),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
        .context("D3D11CreateDevice failed")?;

        (
            device.context("D3D11CreateDevice returned no device")?,
            context.context("D3D11CreateDevice returned no context")?,
        )
    };

    let duplication = unsafe {
        output1
            .DuplicateOutput(&device)
            .context("DuplicateOutput failed")?
    };

    let desc = unsafe { output1.GetDesc().context("output GetDesc failed")? };
    let width = (desc.DesktopCoordinates.right - desc.DesktopCoordinates.left).unsigned_abs();
    let height = (desc.DesktopCoordinates.bottom - desc.DesktopCoordinates.top).unsigned_abs();
    if width == 0 || height == 0 {
        bail!("output has a zero-size desktop rect");
    }

    let staging = [
        create_staging_texture(&device, width, height)?,
        create_staging_texture(&device, width, height)?,
    ];

    log::debug!("duplication ready for display {display_id}: {width}x{height}");

    Ok(Resources {
        _device: device,
        context,
        duplication,
        staging,
        width,
        height,
    })
}

/// Walk adapters and outputs to the output with the given global index.
fn find_output(display_id: u32) -> anyhow::Result<(IDXGIAdapter, IDXGIOutput1)> {
    let factory: IDXGIFactory1 =
        unsafe { CreateDXGIFactory1().context("CreateDXGIFactory1 failed")? };

    let mut global_index = 0u32;
    let mut adapter_index = 0u32;

    loop {
        let adapter: IDXGIAdapter = match unsafe { factory.EnumAdapters(adapter_index) } {
            Ok(adapter) => adapter,
            Err(_) => break, // end of adapters
        };

        let mut output_index = 0u32;
        loop {
            let output: IDXGIOutput = match unsafe { adapter.EnumOutputs(output_index) } {
                Ok(output) => output,
                Err(_) => break, // end of outputs on this adapter
            };

            if global_index == display_id {
                let output1: IDXGIOutput1 = output
                    .cast()
                    .context("IDXGIOutput -> IDXGIOutput1 cast failed")?;
                return Ok((adapter, output1));
            }

            global_index += 1;
            output_index += 1;
        }

        adapter_index += 1;
    }

    bail!("display id {display_id} not found ({global_index} outputs attached)")
}

fn create_staging_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> anyhow::Result<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: 0,
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: 0,
    };

    // SAFETY: desc is fully initialized and the device is live;
    // CreateTexture2D returns a COM-owned object on success.
    unsafe {
        let mut texture = None;
        device
            .CreateTexture2D(&desc, None, Some(&mut texture))
            .context("staging texture creation failed")?;
        texture.context("CreateTexture2D returned no texture")
    }
}
