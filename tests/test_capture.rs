// Integration tests: capture facade against the live desktop.
//
// These only assert hard guarantees when a real display session is
// available; headless CI (no compositor, no X server, no permission)
// prints SKIPPED and returns, in the same spirit as the capture
// hardware tests these are derived from.

use screengate::{CaptureOptions, CaptureOutput, ProcessingLayer, ScreenCapture};

fn open_session() -> Option<ScreenCapture> {
    if !ScreenCapture::is_supported() {
        println!("SKIPPED: platform has no capture backend");
        return None;
    }
    match ScreenCapture::new() {
        Ok(capture) => Some(capture),
        Err(err) => {
            println!("SKIPPED: backend construction failed: {err}");
            None
        }
    }
}

#[test]
fn capture_primary_display() {
    let Some(mut capture) = open_session() else {
        return;
    };

    match capture.capture_primary() {
        Ok(frame) => {
            assert!(frame.is_valid());
            assert!(frame.width > 0 && frame.height > 0);
            assert_eq!(frame.data.len(), (frame.width * frame.height * 3) as usize);
            println!(
                "captured {}x{} via {}",
                frame.width,
                frame.height,
                capture.capture_method()
            );
        }
        Err(err) => {
            // No display to capture from; the error string must still be
            // recorded for the caller.
            println!("SKIPPED: capture failed ({err})");
            assert!(!capture.last_error().is_empty() || err.is_transient());
        }
    }
}

#[test]
fn display_enumeration_has_one_primary() {
    let Some(mut capture) = open_session() else {
        return;
    };

    let displays = capture.displays();
    if displays.is_empty() {
        println!("SKIPPED: no displays enumerated");
        return;
    }

    let primary_count = displays.iter().filter(|d| d.is_primary).count();
    assert_eq!(primary_count, 1, "exactly one primary display expected");

    for display in &displays {
        assert!(display.refresh_rate > 0);
        println!(
            "[{}] {} {}x{} at ({}, {}){}",
            display.id,
            display.name,
            display.bounds.width,
            display.bounds.height,
            display.bounds.x,
            display.bounds.y,
            if display.is_primary { " primary" } else { "" }
        );
    }
}

#[test]
fn shaped_capture_respects_layer_ceiling() {
    let Some(mut capture) = open_session() else {
        return;
    };

    let options = CaptureOptions {
        adaptive_resolution: true,
        layer: ProcessingLayer::Realtime,
        ..Default::default()
    };

    match capture.capture_full_screen(0, &options) {
        Ok(CaptureOutput::Frame(frame)) => {
            assert!(frame.width <= 640 && frame.height <= 480);
        }
        Ok(_) => panic!("no encode option was set"),
        Err(err) => println!("SKIPPED: capture failed ({err})"),
    }
}

#[test]
fn jpeg_capture_produces_decodable_bytes() {
    let Some(mut capture) = open_session() else {
        return;
    };

    let options = CaptureOptions {
        jpeg_quality: Some(80),
        max_width: Some(800),
        ..Default::default()
    };

    match capture.capture_full_screen(0, &options) {
        Ok(CaptureOutput::Jpeg(bytes)) => {
            let decoded = image::load_from_memory(&bytes).expect("returned JPEG must decode");
            assert!(decoded.width() <= 800);
        }
        Ok(_) => panic!("expected JPEG output"),
        Err(err) => println!("SKIPPED: capture failed ({err})"),
    }
}

#[test]
fn invalid_region_is_rejected() {
    let Some(mut capture) = open_session() else {
        return;
    };

    let empty = screengate::Rect::new(0, 0, 0, 0);
    let result = capture.capture_region(&empty, 0, &CaptureOptions::default());
    assert!(result.is_err(), "empty region must fail");
    assert!(!capture.last_error().is_empty());
}
