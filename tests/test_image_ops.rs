// Integration tests: image utility layer.
//
// Covers the published invariants: encode round trips preserve
// dimensions, fit-inside resize arithmetic, cover-and-crop exactness,
// resolution policy bounds, and the per-layer adaptive ceilings.

use screengate::imageops::{
    adaptive_resolution, encode_jpeg, encode_png, optimal_resolution, resize, resize_and_crop,
    resize_keep_aspect, Interpolation, ResolutionPolicy,
};
use screengate::{Frame, PixelLayout, ProcessingLayer};

fn gradient_frame(width: u32, height: u32, layout: PixelLayout) -> Frame {
    let mut frame = Frame::allocate(width, height, layout, 0);
    let bpp = layout.bytes_per_pixel();
    for y in 0..height as usize {
        for x in 0..width as usize {
            let i = (y * width as usize + x) * bpp;
            frame.data[i] = (x * 255 / width as usize) as u8;
            if bpp >= 3 {
                frame.data[i + 1] = (y * 255 / height as usize) as u8;
                frame.data[i + 2] = ((x + y) % 256) as u8;
            }
            if bpp == 4 {
                frame.data[i + 3] = 255;
            }
        }
    }
    frame
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

#[test]
fn jpeg_decode_recovers_dimensions() {
    for (w, h) in [(64, 48), (33, 17), (1, 1)] {
        let frame = gradient_frame(w, h, PixelLayout::Bgr24);
        let bytes = encode_jpeg(&frame, 85).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (w, h));
    }
}

#[test]
fn png_decode_recovers_dimensions_and_pixels() {
    let frame = gradient_frame(40, 30, PixelLayout::Bgr24);
    let bytes = encode_png(&frame, 3).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!((decoded.width(), decoded.height()), (40, 30));

    // PNG is lossless: spot-check a pixel against the BGR source.
    let src = &frame.data[(10 * 40 + 25) * 3..(10 * 40 + 25) * 3 + 3];
    let px = decoded.get_pixel(25, 10).0;
    assert_eq!([src[2], src[1], src[0]], px);
}

#[test]
fn every_quality_level_produces_output() {
    let frame = gradient_frame(32, 32, PixelLayout::Bgr24);
    for quality in [0, 1, 50, 99, 100] {
        assert!(!encode_jpeg(&frame, quality).unwrap().is_empty());
    }
    for level in 0..=9 {
        assert!(!encode_png(&frame, level).unwrap().is_empty());
    }
}

#[test]
fn bgra_frames_encode_too() {
    let frame = gradient_frame(24, 24, PixelLayout::Bgra32);
    assert!(encode_jpeg(&frame, 85).is_ok());
    assert!(encode_png(&frame, 3).is_ok());
}

// ---------------------------------------------------------------------------
// Resize arithmetic
// ---------------------------------------------------------------------------

#[test]
fn fit_inside_1920x1080_to_1280_gives_720() {
    let frame = gradient_frame(1920, 1080, PixelLayout::Bgr24);
    let out = resize_keep_aspect(&frame, 1280, 0, Interpolation::Linear).unwrap();
    assert_eq!((out.width, out.height), (1280, 720));
}

#[test]
fn fit_inside_derives_width_from_height() {
    let frame = gradient_frame(1920, 1080, PixelLayout::Bgr24);
    let out = resize_keep_aspect(&frame, 0, 540, Interpolation::Linear).unwrap();
    assert_eq!((out.width, out.height), (960, 540));
}

#[test]
fn cover_and_crop_is_exact() {
    let frame = gradient_frame(1920, 1080, PixelLayout::Bgr24);
    for (w, h) in [(500, 500), (100, 300), (1280, 720)] {
        let out = resize_and_crop(&frame, w, h, Interpolation::Linear).unwrap();
        assert_eq!((out.width, out.height), (w, h));
    }
}

#[test]
fn nearest_resize_to_same_size_is_pixel_identical() {
    let frame = gradient_frame(97, 61, PixelLayout::Bgr24);
    let out = resize(&frame, 97, 61, Interpolation::Nearest).unwrap();
    assert_eq!(out.data, frame.data);
}

#[test]
fn layout_survives_resizing() {
    for layout in [
        PixelLayout::Bgr24,
        PixelLayout::Rgb24,
        PixelLayout::Bgra32,
        PixelLayout::Rgba32,
        PixelLayout::Gray8,
    ] {
        let frame = gradient_frame(64, 64, layout);
        let out = resize(&frame, 32, 32, Interpolation::Linear).unwrap();
        assert_eq!(out.layout, layout);
        assert_eq!(out.data.len(), 32 * 32 * layout.bytes_per_pixel());
    }
}

// ---------------------------------------------------------------------------
// Resolution policy
// ---------------------------------------------------------------------------

#[test]
fn optimal_resolution_respects_max_and_aspect() {
    let policy = ResolutionPolicy {
        max_width: Some(800),
        max_height: Some(800),
        keep_aspect_ratio: true,
        ..Default::default()
    };
    let (w, h) = optimal_resolution(1920, 1080, &policy);
    assert!(w <= 800 && h <= 800);

    // Aspect preserved to within a pixel.
    let expected_h = (h as f64 * 1920.0 / 1080.0).round() as i64;
    assert!((expected_h - w as i64).abs() <= 1);
}

#[test]
fn optimal_resolution_passes_small_frames_through() {
    let policy = ResolutionPolicy {
        max_width: Some(1920),
        max_height: Some(1080),
        keep_aspect_ratio: true,
        ..Default::default()
    };
    assert_eq!(optimal_resolution(640, 480, &policy), (640, 480));
}

#[test]
fn target_overrides_max() {
    let policy = ResolutionPolicy {
        max_width: Some(800),
        target_width: Some(1000),
        target_height: Some(500),
        keep_aspect_ratio: false,
        ..Default::default()
    };
    assert_eq!(optimal_resolution(1920, 1080, &policy), (1000, 500));
}

// ---------------------------------------------------------------------------
// Adaptive (per-layer) resolution
// ---------------------------------------------------------------------------

#[test]
fn adaptive_layer_scenarios() {
    assert_eq!(
        adaptive_resolution(1920, 1080, ProcessingLayer::Realtime),
        (640, 360)
    );
    assert_eq!(
        adaptive_resolution(3840, 2160, ProcessingLayer::Analysis),
        (1920, 1080)
    );
    assert_eq!(
        adaptive_resolution(640, 480, ProcessingLayer::Realtime),
        (640, 480)
    );
}

#[test]
fn adaptive_resolution_stays_under_every_ceiling() {
    let inputs = [
        (1920u32, 1080u32),
        (3840, 2160),
        (2560, 1440),
        (1366, 768),
        (800, 12000),
    ];
    for layer in [
        ProcessingLayer::Realtime,
        ProcessingLayer::Detection,
        ProcessingLayer::Analysis,
        ProcessingLayer::Understanding,
    ] {
        let (max_w, max_h) = layer.ceiling();
        for (w, h) in inputs {
            let (ow, oh) = adaptive_resolution(w, h, layer);
            assert!(ow <= max_w && oh <= max_h, "{w}x{h} -> {ow}x{oh} for {layer:?}");
        }
    }
}
