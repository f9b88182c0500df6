// Tier 2: Windows.Graphics.Capture.
//
// Compositor-backed capture used when desktop duplication is refused.
// A session is built per monitor: interop factory → capture item →
// free-threaded BGRA8 frame pool of two buffers → capture session.
// Frames are polled rather than event-driven; the pool has startup
// latency, so the first frames may need a few 50 ms waits.

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context as AnyhowContext, Result as AnyResult};
use windows::core::Interface;
use windows::Graphics::Capture::{
    Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::{IDirect3DDevice, IDirect3DSurface};
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::Graphics::Gdi::HMONITOR;
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::System::WinRT::{RoInitialize, RO_INIT_MULTITHREADED};

use crate::error::{CaptureError, Result};
use crate::types::Frame;

/// First-frame warm-up: poll attempts and the pause between them.
const FRAME_POLL_RETRIES: usize = 5;
const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lazy holder for the WGC session. Initialization failure is sticky:
/// the runtime either has the API or it does not.
pub(super) struct WgcTier {
    session: Option<WgcSession>,
    init_failed: bool,
}

impl WgcTier {
    pub(super) fn new() -> Self {
        WgcTier {
            session: None,
            init_failed: false,
        }
    }

    pub(super) fn is_usable(&self) -> bool {
        !self.init_failed
    }

    pub(super) fn capture(&mut self, hmonitor: HMONITOR, display_id: i32) -> Result<Frame> {
        // Rebuild on monitor change; the capture item is per-output.
        if self
            .session
            .as_ref()
            .map(|s| s.display_id != display_id)
            .unwrap_or(false)
        {
            self.session = None;
        }

        if self.session.is_none() {
            match WgcSession::new(hmonitor, display_id) {
                Ok(session) => self.session = Some(session),
                Err(err) => {
                    self.init_failed = true;
                    return Err(CaptureError::ResourceFailure(format!(
                        "graphics capture init failed: {err}"
                    )));
                }
            }
        }

        let session = self.session.as_mut().expect("session populated above");
        session.capture()
    }
}

struct WgcSession {
    // Field order is teardown order: session and pool close first.
    session: GraphicsCaptureSession,
    frame_pool: Direct3D11CaptureFramePool,
    _item: GraphicsCaptureItem,
    _direct3d_device: IDirect3DDevice,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    staging: Option<StagingCache>,
    display_id: i32,
}

struct StagingCache {
    texture: ID3D11Texture2D,
    width: u32,
    height: u32,
}

impl WgcSession {
    fn new(hmonitor: HMONITOR, display_id: i32) -> AnyResult<Self> {
        if !GraphicsCaptureSession::IsSupported().unwrap_or(false) {
            bail!("Windows.Graphics.Capture is not supported on this build");
        }

        unsafe {
            // SAFETY: idempotent per thread; an already-initialized
            // apartment answers RPC_E_CHANGED_MODE, which is fine here.
            let _ = RoInitialize(RO_INIT_MULTITHREADED);
        }

        let (device, context) = create_bgra_device()?;
        let dxgi_device: IDXGIDevice = device.cast().context("device -> IDXGIDevice cast")?;
        let direct3d_device: IDirect3DDevice = unsafe {
            CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)
                .context("CreateDirect3D11DeviceFromDXGIDevice failed")?
                .cast()
                .context("IInspectable -> IDirect3DDevice cast")?
        };

        let item = create_capture_item_for_monitor(hmonitor)?;
        let size = item.Size().context("capture item size")?;

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &direct3d_device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            2, // double buffered
            size,
        )
        .context("frame pool creation failed")?;

        let session = frame_pool
            .CreateCaptureSession(&item)
            .context("capture session creation failed")?;
        // Yellow capture border; the setter needs a consent API absent on
        // older builds, so failure is ignored.
        let _ = session.SetIsBorderRequired(false);

        session.StartCapture().context("StartCapture failed")?;

        log::debug!(
            "graphics capture session started for display {display_id}: {}x{}",
            size.Width,
            size.Height
        );

        Ok(WgcSession {
            session,
            frame_pool,
            _item: item,
            _direct3d_device: direct3d_device,
            device,
            context,
            staging: None,
            display_id,
        })
    }

    fn capture(&mut self) -> Result<Frame> {
        // Poll with retries: the pool delivers nothing until the
        // compositor has produced the first frame after StartCapture.
        let mut frame = None;
        for attempt in 0..=FRAME_POLL_RETRIES {
            match self.frame_pool.TryGetNextFrame() {
                Ok(next) => {
                    frame = Some(next);
                    break;
                }
                Err(_) if attempt < FRAME_POLL_RETRIES => thread::sleep(FRAME_POLL_INTERVAL),
                Err(_) => {}
            }
        }

        let frame = frame.ok_or_else(|| {
            CaptureError::BackendTransient("graphics capture frame not ready".into())
        })?;

        // The surface must be read before the frame is dropped.
        let surface: IDirect3DSurface = frame
            .Surface()
            .map_err(|e| CaptureError::ResourceFailure(format!("frame surface: {e}")))?;
        let access: IDirect3DDxgiInterfaceAccess = surface
            .cast()
            .map_err(|e| CaptureError::ResourceFailure(format!("surface interface access: {e}")))?;
        // SAFETY: GetInterface is COM interop on an access object we just
        // obtained; the returned texture is owned by the frame's surface.
        let texture: ID3D11Texture2D = unsafe {
            access
                .GetInterface()
                .map_err(|e| CaptureError::ResourceFailure(format!("surface texture: {e}")))?
        };

        self.read_texture(&texture)
    }

    fn read_texture(&mut self, texture: &ID3D11Texture2D) -> Result<Frame> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe {
            texture.GetDesc(&mut desc);
        }

        self.ensure_staging(desc.Width, desc.Height)?;
        let staging = &self.staging.as_ref().expect("staging ensured").texture;

        unsafe {
            self.context.CopyResource(staging, texture);

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|e| CaptureError::ResourceFailure(format!("staging map failed: {e}")))?;

            let frame = super::bgra_rows_to_bgr_frame(
                mapped.pData as *const u8,
                mapped.RowPitch as usize,
                desc.Width,
                desc.Height,
            );

            self.context.Unmap(staging, 0);

            Ok(frame)
        }
    }

    /// Staging texture cached across calls, rebuilt on size change.
    fn ensure_staging(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(cache) = &self.staging {
            if cache.width == width && cache.height == height {
                return Ok(());
            }
        }

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

        // SAFETY: desc is fully initialized and the device is live.
        unsafe {
            let mut texture = None;
            self.device
                .CreateTexture2D(&desc, None, Some(&mut texture))
                .map_err(|e| {
                    CaptureError::ResourceFailure(format!("staging texture creation: {e}"))
                })?;
            self.staging = Some(StagingCache {
                texture: texture.ok_or_else(|| {
                    CaptureError::ResourceFailure("CreateTexture2D returned no texture".into())
                })?,
                width,
                height,
            });
        }

        Ok(())
    }
}

impl Drop for WgcSession {
    fn drop(&mut self) {
        // Closable-session idiom: stop the session, then retire the pool.
        let _ = self.session.Close();
        let _ = self.frame_pool.Close();
    }
}

fn create_bgra_device() -> AnyResult<(ID3D11Device, ID3D11DeviceContext)> {
    unsafe {
        let mut device = None;
        let mut context = None;

        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&[D3D_FEATURE_LEVEL_11_0]),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
        .context("D3D11CreateDevice failed")?;

        Ok((
            device.context("D3D11CreateDevice returned no device")?,
            context.context("D3D11CreateDevice returned no context")?,
        ))
    }
}

/// Create a GraphicsCaptureItem from a monitor handle.
fn create_capture_item_for_monitor(hmonitor: HMONITOR) -> AnyResult<GraphicsCaptureItem> {
    // SAFETY: factory call; failure means the runtime class is missing
    // or COM is not initialized for this thread.
    unsafe {
        let interop: IGraphicsCaptureItemInterop =
            windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
                .context("IGraphicsCaptureItemInterop factory unavailable")?;

        interop
            .CreateForMonitor(hmonitor)
            .context("CreateForMonitor failed")
    }
}
