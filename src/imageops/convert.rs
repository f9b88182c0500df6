// Pixel-layout conversions.
//
// Any of the five layouts converts to any other. Gray output uses the
// BT.601 integer luma (299/587/114) so downstream change scores match
// what a video-oriented pipeline produces; the `image` crate's own
// BT.709 luma is intentionally not used here.

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::error::{CaptureError, Result};
use crate::types::{Frame, PixelLayout};

/// Convert `frame` to `target` layout, returning a tightly packed frame.
///
/// Strided inputs are repacked row by row; tightly packed inputs with an
/// unchanged layout take a single bulk copy.
pub fn convert(frame: &Frame, target: PixelLayout) -> Result<Frame> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "convert: invalid input frame".into(),
        ));
    }

    let width = frame.width as usize;
    let height = frame.height as usize;
    let src_row = frame.row_bytes();
    let src_stride = frame.effective_stride();

    // Same layout: plain repack (bulk copy when already tight).
    if frame.layout == target {
        let mut out = Frame::allocate(frame.width, frame.height, target, 0);
        if src_stride == src_row {
            out.data.copy_from_slice(&frame.data[..src_row * height]);
        } else {
            for y in 0..height {
                let src = &frame.data[y * src_stride..y * src_stride + src_row];
                out.data[y * src_row..(y + 1) * src_row].copy_from_slice(src);
            }
        }
        return Ok(out);
    }

    let mut out = Frame::allocate(frame.width, frame.height, target, 0);
    let dst_bpp = target.bytes_per_pixel();
    let src_bpp = frame.layout.bytes_per_pixel();
    let dst_row = width * dst_bpp;

    for y in 0..height {
        let src = &frame.data[y * src_stride..y * src_stride + src_row];
        let dst = &mut out.data[y * dst_row..(y + 1) * dst_row];
        for x in 0..width {
            let px = read_pixel(&src[x * src_bpp..], frame.layout);
            write_pixel(&mut dst[x * dst_bpp..], target, px);
        }
    }

    Ok(out)
}

/// Integer BT.601 luma, rounded.
#[inline]
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Read one pixel as (R, G, B, A).
#[inline]
fn read_pixel(src: &[u8], layout: PixelLayout) -> [u8; 4] {
    match layout {
        PixelLayout::Rgb24 => [src[0], src[1], src[2], 255],
        PixelLayout::Bgr24 => [src[2], src[1], src[0], 255],
        PixelLayout::Rgba32 => [src[0], src[1], src[2], src[3]],
        PixelLayout::Bgra32 => [src[2], src[1], src[0], src[3]],
        PixelLayout::Gray8 => [src[0], src[0], src[0], 255],
    }
}

/// Write one (R, G, B, A) pixel in the target layout.
#[inline]
fn write_pixel(dst: &mut [u8], layout: PixelLayout, px: [u8; 4]) {
    let [r, g, b, a] = px;
    match layout {
        PixelLayout::Rgb24 => {
            dst[0] = r;
            dst[1] = g;
            dst[2] = b;
        }
        PixelLayout::Bgr24 => {
            dst[0] = b;
            dst[1] = g;
            dst[2] = r;
        }
        PixelLayout::Rgba32 => {
            dst[0] = r;
            dst[1] = g;
            dst[2] = b;
            dst[3] = a;
        }
        PixelLayout::Bgra32 => {
            dst[0] = b;
            dst[1] = g;
            dst[2] = r;
            dst[3] = a;
        }
        PixelLayout::Gray8 => dst[0] = luma(r, g, b),
    }
}

// ---------------------------------------------------------------------------
// Bridges to the `image` crate
// ---------------------------------------------------------------------------

/// View a frame as a [`DynamicImage`], normalizing channel order to RGB.
pub(crate) fn to_dynamic(frame: &Frame) -> Result<DynamicImage> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "invalid frame buffer".into(),
        ));
    }
    let img = match frame.layout {
        PixelLayout::Gray8 => {
            let gray = convert(frame, PixelLayout::Gray8)?;
            DynamicImage::ImageLuma8(
                GrayImage::from_raw(frame.width, frame.height, gray.data)
                    .ok_or_else(buffer_mismatch)?,
            )
        }
        PixelLayout::Rgba32 | PixelLayout::Bgra32 => {
            let rgba = convert(frame, PixelLayout::Rgba32)?;
            DynamicImage::ImageRgba8(
                RgbaImage::from_raw(frame.width, frame.height, rgba.data)
                    .ok_or_else(buffer_mismatch)?,
            )
        }
        PixelLayout::Rgb24 | PixelLayout::Bgr24 => {
            let rgb = convert(frame, PixelLayout::Rgb24)?;
            DynamicImage::ImageRgb8(
                RgbImage::from_raw(frame.width, frame.height, rgb.data)
                    .ok_or_else(buffer_mismatch)?,
            )
        }
    };
    Ok(img)
}

/// Turn an RGB-ordered [`DynamicImage`] back into a frame of `layout`.
pub(crate) fn from_dynamic(img: DynamicImage, layout: PixelLayout) -> Result<Frame> {
    let (width, height) = (img.width(), img.height());
    let rgb_frame = match layout {
        PixelLayout::Gray8 => {
            // Go through RGB so the BT.601 luma applies, not the crate's.
            let rgb = img.to_rgb8();
            Frame {
                data: rgb.into_raw(),
                width,
                height,
                layout: PixelLayout::Rgb24,
                stride: 0,
            }
        }
        PixelLayout::Rgba32 | PixelLayout::Bgra32 => {
            let rgba = img.to_rgba8();
            Frame {
                data: rgba.into_raw(),
                width,
                height,
                layout: PixelLayout::Rgba32,
                stride: 0,
            }
        }
        PixelLayout::Rgb24 | PixelLayout::Bgr24 => {
            let rgb = img.to_rgb8();
            Frame {
                data: rgb.into_raw(),
                width,
                height,
                layout: PixelLayout::Rgb24,
                stride: 0,
            }
        }
    };
    convert(&rgb_frame, layout)
}

/// Frame as an [`RgbImage`] working copy.
pub(crate) fn to_rgb_image(frame: &Frame) -> Result<RgbImage> {
    let rgb = convert(frame, PixelLayout::Rgb24)?;
    RgbImage::from_raw(frame.width, frame.height, rgb.data).ok_or_else(buffer_mismatch)
}

/// Frame as a [`GrayImage`] working copy (BT.601 luma).
pub(crate) fn to_gray_image(frame: &Frame) -> Result<GrayImage> {
    let gray = convert(frame, PixelLayout::Gray8)?;
    GrayImage::from_raw(frame.width, frame.height, gray.data).ok_or_else(buffer_mismatch)
}

fn buffer_mismatch() -> CaptureError {
    CaptureError::InvalidInput("frame buffer length does not match geometry".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, layout: PixelLayout, px: &[u8]) -> Frame {
        let mut frame = Frame::allocate(width, height, layout, 0);
        for chunk in frame.data.chunks_exact_mut(px.len()) {
            chunk.copy_from_slice(px);
        }
        frame
    }

    #[test]
    fn bgr_rgb_round_trip_is_identity() {
        let mut frame = Frame::allocate(3, 2, PixelLayout::Bgr24, 0);
        for (i, b) in frame.data.iter_mut().enumerate() {
            *b = (i * 7 % 251) as u8;
        }
        let rgb = convert(&frame, PixelLayout::Rgb24).unwrap();
        let back = convert(&rgb, PixelLayout::Bgr24).unwrap();
        assert_eq!(frame.data, back.data);
    }

    #[test]
    fn bgra_to_bgr_drops_alpha() {
        let frame = solid(2, 2, PixelLayout::Bgra32, &[10, 20, 30, 200]);
        let bgr = convert(&frame, PixelLayout::Bgr24).unwrap();
        assert_eq!(&bgr.data[..3], &[10, 20, 30]);
        assert_eq!(bgr.data.len(), 12);
    }

    #[test]
    fn bgr_to_rgba_adds_opaque_alpha() {
        let frame = solid(1, 1, PixelLayout::Bgr24, &[10, 20, 30]);
        let rgba = convert(&frame, PixelLayout::Rgba32).unwrap();
        assert_eq!(rgba.data, vec![30, 20, 10, 255]);
    }

    #[test]
    fn gray_uses_bt601_weights() {
        // Pure green: (299*0 + 587*255 + 114*0 + 500) / 1000 = 150
        let frame = solid(1, 1, PixelLayout::Rgb24, &[0, 255, 0]);
        let gray = convert(&frame, PixelLayout::Gray8).unwrap();
        assert_eq!(gray.data, vec![150]);

        // White stays white, black stays black.
        let white = solid(1, 1, PixelLayout::Bgr24, &[255, 255, 255]);
        assert_eq!(convert(&white, PixelLayout::Gray8).unwrap().data, vec![255]);
        let black = solid(1, 1, PixelLayout::Bgr24, &[0, 0, 0]);
        assert_eq!(convert(&black, PixelLayout::Gray8).unwrap().data, vec![0]);
    }

    #[test]
    fn gray_to_color_replicates() {
        let frame = solid(1, 1, PixelLayout::Gray8, &[77]);
        let bgr = convert(&frame, PixelLayout::Bgr24).unwrap();
        assert_eq!(bgr.data, vec![77, 77, 77]);
    }

    #[test]
    fn strided_input_is_repacked() {
        // 2x2 BGR with 8-byte stride (2 bytes of padding per row).
        let mut frame = Frame::allocate(2, 2, PixelLayout::Bgr24, 8);
        frame.data[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        frame.data[8..14].copy_from_slice(&[7, 8, 9, 10, 11, 12]);

        let tight = convert(&frame, PixelLayout::Bgr24).unwrap();
        assert_eq!(tight.stride, 0);
        assert_eq!(
            tight.data,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
        );
    }

    #[test]
    fn invalid_frame_is_rejected() {
        let frame = Frame::default();
        assert!(convert(&frame, PixelLayout::Bgr24).is_err());
    }
}
