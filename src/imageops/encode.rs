// JPEG / PNG encoding via the `image` crate.
//
// Out-of-range quality and compression parameters are silently replaced
// by the defaults (85 and 3) rather than rejected.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use crate::error::{CaptureError, Result};
use crate::types::{Frame, PixelLayout};

use super::convert::convert;

const DEFAULT_JPEG_QUALITY: i32 = 85;
const DEFAULT_PNG_COMPRESSION: i32 = 3;

/// Encode a frame as baseline JPEG.
///
/// Alpha is stripped; gray frames are encoded single-channel.
pub fn encode_jpeg(frame: &Frame, quality: i32) -> Result<Vec<u8>> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "encode_jpeg: invalid input frame".into(),
        ));
    }

    let quality = if (0..=100).contains(&quality) {
        quality
    } else {
        DEFAULT_JPEG_QUALITY
    } as u8;

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), quality);

    if frame.layout == PixelLayout::Gray8 {
        let gray = convert(frame, PixelLayout::Gray8)?;
        encoder.write_image(&gray.data, frame.width, frame.height, ExtendedColorType::L8)?;
    } else {
        let rgb = convert(frame, PixelLayout::Rgb24)?;
        encoder.write_image(&rgb.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
    }

    Ok(out)
}

/// Encode a frame as PNG.
///
/// The 0–9 compression level maps onto the encoder's Fast (0–2),
/// Default (3–6) and Best (7–9) tiers. Alpha is preserved.
pub fn encode_png(frame: &Frame, compression_level: i32) -> Result<Vec<u8>> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidInput(
            "encode_png: invalid input frame".into(),
        ));
    }

    let level = if (0..=9).contains(&compression_level) {
        compression_level
    } else {
        DEFAULT_PNG_COMPRESSION
    };
    let compression = match level {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    };

    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut out),
        compression,
        FilterType::Adaptive,
    );

    match frame.layout {
        PixelLayout::Gray8 => {
            let gray = convert(frame, PixelLayout::Gray8)?;
            encoder.write_image(&gray.data, frame.width, frame.height, ExtendedColorType::L8)?;
        }
        PixelLayout::Rgba32 | PixelLayout::Bgra32 => {
            let rgba = convert(frame, PixelLayout::Rgba32)?;
            encoder.write_image(
                &rgba.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgba8,
            )?;
        }
        _ => {
            let rgb = convert(frame, PixelLayout::Rgb24)?;
            encoder.write_image(&rgb.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> Frame {
        let mut frame = Frame::allocate(width, height, PixelLayout::Bgr24, 0);
        for y in 0..height as usize {
            for x in 0..width as usize {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                let i = (y * width as usize + x) * 3;
                frame.data[i] = v;
                frame.data[i + 1] = v;
                frame.data[i + 2] = v;
            }
        }
        frame
    }

    #[test]
    fn jpeg_round_trip_preserves_dimensions() {
        let frame = checker(32, 24);
        let bytes = encode_jpeg(&frame, 85).unwrap();
        assert!(!bytes.is_empty());

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let frame = checker(16, 16);
        let bytes = encode_png(&frame, 3).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
        // Checkerboard survives exactly.
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(decoded.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn out_of_range_parameters_fall_back_to_defaults() {
        let frame = checker(8, 8);
        assert!(encode_jpeg(&frame, -5).is_ok());
        assert!(encode_jpeg(&frame, 150).is_ok());
        assert!(encode_png(&frame, -1).is_ok());
        assert!(encode_png(&frame, 42).is_ok());
    }

    #[test]
    fn invalid_frame_is_rejected() {
        let frame = Frame::default();
        assert!(encode_jpeg(&frame, 85).is_err());
        assert!(encode_png(&frame, 3).is_err());
    }

    #[test]
    fn gray_frames_encode() {
        let mut frame = Frame::allocate(8, 8, PixelLayout::Gray8, 0);
        frame.data.iter_mut().for_each(|b| *b = 128);
        assert!(encode_jpeg(&frame, 85).is_ok());
        assert!(encode_png(&frame, 3).is_ok());
    }
}
