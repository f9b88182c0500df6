// Canonical frame container and geometry types shared by capture and triage.

/// Pixel layout of a [`Frame`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelLayout {
    /// 3 bytes per pixel, R first.
    Rgb24,
    /// 3 bytes per pixel, B first. Default delivery format of every backend.
    #[default]
    Bgr24,
    /// 4 bytes per pixel, R first.
    Rgba32,
    /// 4 bytes per pixel, B first.
    Bgra32,
    /// 1 byte per pixel.
    Gray8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => 3,
            PixelLayout::Rgba32 | PixelLayout::Bgra32 => 4,
            PixelLayout::Gray8 => 1,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelLayout::Rgba32 | PixelLayout::Bgra32)
    }
}

/// Canonical image buffer: row-major, top-down.
///
/// `stride` is the byte distance between row starts; `0` means tightly
/// packed (`width * bytes_per_pixel`). Backends always deliver tightly
/// packed buffers; strided frames only enter through the host.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub stride: u32,
}

impl Frame {
    /// Allocate a zeroed frame of the given geometry.
    pub fn allocate(width: u32, height: u32, layout: PixelLayout, stride: u32) -> Self {
        let mut frame = Frame {
            data: Vec::new(),
            width,
            height,
            layout,
            stride,
        };
        frame.data.resize(frame.total_size(), 0);
        frame
    }

    /// Bytes of actual pixel data per row (excludes stride padding).
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Byte distance between row starts, resolving the packed-stride sentinel.
    pub fn effective_stride(&self) -> usize {
        if self.stride > 0 {
            self.stride as usize
        } else {
            self.row_bytes()
        }
    }

    /// Minimum buffer length required by the geometry.
    pub fn total_size(&self) -> usize {
        self.effective_stride() * self.height as usize
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && !self.data.is_empty()
            && self.effective_stride() >= self.row_bytes()
            && self.data.len() >= self.total_size()
    }

    /// Drop the pixel data and zero the geometry.
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
        self.stride = 0;
    }
}

/// Rectangle with a signed origin and an unsigned extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x
            && px < self.x + self.width as i32
            && py >= self.y
            && py < self.y + self.height as i32
    }
}

/// One attached display.
///
/// `bounds` is expressed in virtual-desktop coordinates: the primary
/// display's top-left is not necessarily (0, 0) on multi-monitor layouts.
#[derive(Debug, Clone, Default)]
pub struct DisplayInfo {
    /// Dense index assigned in enumeration order.
    pub id: u32,
    pub name: String,
    pub bounds: Rect,
    pub is_primary: bool,
    /// Refresh rate in Hz.
    pub refresh_rate: u32,
    /// Physical width in millimetres, when the platform reports it.
    pub physical_width: Option<u32>,
    /// Physical height in millimetres, when the platform reports it.
    pub physical_height: Option<u32>,
}

/// Platform-opaque window identifier (HWND value, X11 window id, CGWindowID).
pub type WindowHandle = usize;

/// Downstream pipeline stage a frame is being shaped for.
///
/// Each stage has a resolution ceiling; see
/// [`crate::imageops::adaptive_resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingLayer {
    /// Layer 0: real-time change triage.
    #[default]
    Realtime,
    /// Layer 1: object detection.
    Detection,
    /// Layer 2: heavyweight vision analysis.
    Analysis,
    /// Layer 3: visual-language understanding.
    Understanding,
}

impl ProcessingLayer {
    /// Maximum extent frames destined for this layer should have.
    pub fn ceiling(self) -> (u32, u32) {
        match self {
            ProcessingLayer::Realtime => (640, 480),
            ProcessingLayer::Detection => (1280, 720),
            ProcessingLayer::Analysis => (1920, 1080),
            ProcessingLayer::Understanding => (1024, 768),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_validity_tracks_buffer_size() {
        let frame = Frame::allocate(4, 4, PixelLayout::Bgr24, 0);
        assert!(frame.is_valid());
        assert_eq!(frame.data.len(), 48);

        let mut short = frame.clone();
        short.data.truncate(10);
        assert!(!short.is_valid());

        let empty = Frame::default();
        assert!(!empty.is_valid());
    }

    #[test]
    fn strided_frame_size() {
        let frame = Frame::allocate(10, 4, PixelLayout::Bgra32, 48);
        assert_eq!(frame.effective_stride(), 48);
        assert_eq!(frame.total_size(), 192);
        assert_eq!(frame.row_bytes(), 40);
        assert!(frame.is_valid());

        // A stride shorter than a row can never be valid.
        let mut broken = frame.clone();
        broken.stride = 8;
        assert!(!broken.is_valid());
    }

    #[test]
    fn rect_contains_is_half_open() {
        let r = Rect::new(10, 10, 20, 20);
        assert!(r.contains(10, 10));
        assert!(r.contains(29, 29));
        assert!(!r.contains(30, 30));
        assert!(!r.contains(9, 15));
        assert!(!Rect::default().is_valid());
    }

    #[test]
    fn layer_ceilings() {
        assert_eq!(ProcessingLayer::Realtime.ceiling(), (640, 480));
        assert_eq!(ProcessingLayer::Detection.ceiling(), (1280, 720));
        assert_eq!(ProcessingLayer::Analysis.ceiling(), (1920, 1080));
        assert_eq!(ProcessingLayer::Understanding.ceiling(), (1024, 768));
    }
}
