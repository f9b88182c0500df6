// Integration tests: triage engine end-to-end scenarios.
//
// Full-resolution frames go in, scores and trigger decisions come out.
// Scenarios follow the intended host usage: a static stream must stay
// quiet, a color flip must raise the color score, a local patch must be
// found and boxed.

use screengate::{Frame, PixelLayout, Rect, TriageConfig, TriageEngine};

fn solid_frame(width: u32, height: u32, b: u8, g: u8, r: u8) -> Frame {
    let mut frame = Frame::allocate(width, height, PixelLayout::Bgr24, 0);
    for px in frame.data.chunks_exact_mut(3) {
        px[0] = b;
        px[1] = g;
        px[2] = r;
    }
    frame
}

fn with_patch(base: &Frame, patch: Rect, b: u8, g: u8, r: u8) -> Frame {
    let mut frame = base.clone();
    let width = frame.width as usize;
    for y in patch.y.max(0) as usize..(patch.y as usize + patch.height as usize).min(frame.height as usize) {
        for x in patch.x.max(0) as usize..(patch.x as usize + patch.width as usize).min(width) {
            let i = (y * width + x) * 3;
            frame.data[i] = b;
            frame.data[i + 1] = g;
            frame.data[i + 2] = r;
        }
    }
    frame
}

// ---------------------------------------------------------------------------
// Scenario: static single-color stream
// ---------------------------------------------------------------------------

#[test]
fn static_stream_never_triggers() {
    let config = TriageConfig::default();
    let threshold = config.overall_threshold;
    let mut engine = TriageEngine::new(config);
    let frame = solid_frame(1920, 1080, 128, 128, 128);

    for i in 0..10 {
        let result = engine.process_frame(&frame);
        assert!(
            result.overall_change_score < threshold,
            "frame {i}: score {} not below {threshold}",
            result.overall_change_score
        );
        assert!(!result.should_trigger_layer1, "frame {i} triggered");
    }
}

// ---------------------------------------------------------------------------
// Scenario: red-to-blue color flip
// ---------------------------------------------------------------------------

#[test]
fn color_flip_raises_color_score() {
    let mut engine = TriageEngine::new(TriageConfig::default());

    // Baseline: static stream's second-frame score.
    let gray = solid_frame(1920, 1080, 128, 128, 128);
    engine.process_frame(&gray);
    let static_result = engine.process_frame(&gray);

    engine.reset();
    let red = solid_frame(1920, 1080, 0, 0, 255);
    let blue = solid_frame(1920, 1080, 255, 0, 0);
    engine.process_frame(&red);
    let flip_result = engine.process_frame(&blue);

    assert!(
        flip_result.color_change_score > 0.0,
        "flip color score was {}",
        flip_result.color_change_score
    );
    assert!(
        flip_result.overall_change_score > static_result.overall_change_score,
        "flip {} not above static {}",
        flip_result.overall_change_score,
        static_result.overall_change_score
    );
}

// ---------------------------------------------------------------------------
// Scenario: local white patch on a gray screen
// ---------------------------------------------------------------------------

#[test]
fn local_patch_is_boxed_in_processing_coordinates() {
    let config = TriageConfig::default();
    let (pw, ph) = (config.processing_width, config.processing_height);
    let mut engine = TriageEngine::new(config);

    let base = solid_frame(1920, 1080, 100, 100, 100);
    let changed = with_patch(&base, Rect::new(100, 100, 200, 200), 255, 255, 255);

    engine.process_frame(&base);
    let result = engine.process_frame(&changed);

    assert!(result.frame_diff_score > 0.0);
    assert!(!result.changed_regions.is_empty());

    // Map the patch centre into working-image coordinates and expect a
    // region to cover it.
    let cx = (200.0 * pw as f64 / 1920.0) as i32;
    let cy = (200.0 * ph as f64 / 1080.0) as i32;
    assert!(
        result.changed_regions.iter().any(|r| r.contains(cx, cy)),
        "no region contains ({cx}, {cy}): {:?}",
        result.changed_regions
    );
}

// ---------------------------------------------------------------------------
// First-frame and reset invariants
// ---------------------------------------------------------------------------

#[test]
fn first_frame_after_construction_and_reset_is_quiet() {
    let mut engine = TriageEngine::new(TriageConfig::default());
    let noisy = solid_frame(1280, 720, 200, 10, 60);

    let first = engine.process_frame(&noisy);
    assert_eq!(first.frame_diff_score, 0.0);
    assert_eq!(first.color_change_score, 0.0);
    assert_eq!(first.motion_score, 0.0);
    assert!(!first.should_trigger_layer1);

    engine.process_frame(&solid_frame(1280, 720, 0, 0, 0));
    engine.reset();

    let after_reset = engine.process_frame(&noisy);
    assert_eq!(after_reset.overall_change_score, 0.0);
    assert!(!after_reset.should_trigger_layer1);
}

// ---------------------------------------------------------------------------
// Score bounds and fusion
// ---------------------------------------------------------------------------

#[test]
fn scores_stay_in_unit_range_under_extreme_change() {
    let mut engine = TriageEngine::new(TriageConfig::default());
    let black = solid_frame(640, 480, 0, 0, 0);
    let white = solid_frame(640, 480, 255, 255, 255);

    engine.process_frame(&black);
    for i in 0..6 {
        let frame = if i % 2 == 0 { &white } else { &black };
        let result = engine.process_frame(frame);
        for (name, score) in [
            ("diff", result.frame_diff_score),
            ("color", result.color_change_score),
            ("motion", result.motion_score),
            ("overall", result.overall_change_score),
        ] {
            assert!((0.0..=1.0).contains(&score), "{name} score {score} escaped");
        }
    }
}

#[test]
fn overall_is_bounded_by_the_weight_sum() {
    let config = TriageConfig {
        frame_diff_weight: 0.2,
        color_change_weight: 0.1,
        motion_weight: 0.1,
        ..TriageConfig::default()
    };
    let mut engine = TriageEngine::new(config);
    let black = solid_frame(640, 480, 0, 0, 0);
    let white = solid_frame(640, 480, 255, 255, 255);

    engine.process_frame(&black);
    let result = engine.process_frame(&white);
    assert!(result.overall_change_score <= 0.4 + 1e-9);
}

#[test]
fn full_screen_change_triggers_layer1() {
    let config = TriageConfig {
        enable_adaptive_threshold: false,
        ..TriageConfig::default()
    };
    let mut engine = TriageEngine::new(config);
    let black = solid_frame(1280, 720, 0, 0, 0);
    let white = solid_frame(1280, 720, 255, 255, 255);

    engine.process_frame(&black);
    let result = engine.process_frame(&white);
    assert!(result.frame_diff_score > 0.9);
    assert!(result.should_trigger_layer1);
}

// ---------------------------------------------------------------------------
// Adaptive threshold across a long sequence
// ---------------------------------------------------------------------------

#[test]
fn adaptive_threshold_never_leaves_its_clamp() {
    let mut engine = TriageEngine::new(TriageConfig::default());
    let black = solid_frame(640, 480, 0, 0, 0);
    let white = solid_frame(640, 480, 255, 255, 255);

    for i in 0..100 {
        // Bursts of change and calm.
        let frame = if (i / 10) % 2 == 0 { &black } else { &white };
        engine.process_frame(frame);
        let threshold = engine.effective_threshold();
        assert!(
            (0.05..=0.5).contains(&threshold),
            "threshold {threshold} after frame {i}"
        );
    }
}

// ---------------------------------------------------------------------------
// Config updates mid-stream
// ---------------------------------------------------------------------------

#[test]
fn motion_can_be_disabled() {
    let config = TriageConfig {
        enable_motion_detection: false,
        ..TriageConfig::default()
    };
    let mut engine = TriageEngine::new(config);
    let black = solid_frame(640, 480, 0, 0, 0);
    let white = solid_frame(640, 480, 255, 255, 255);

    engine.process_frame(&black);
    let result = engine.process_frame(&white);
    assert_eq!(result.motion_score, 0.0);
    assert!(result.motion_regions.is_empty());
}

#[test]
fn config_is_readable_back() {
    let config = TriageConfig {
        histogram_bins: 16,
        processing_width: 320,
        processing_height: 240,
        ..TriageConfig::default()
    };
    let engine = TriageEngine::new(config);
    assert_eq!(engine.config().histogram_bins, 16);
    assert_eq!(engine.config().processing_width, 320);
}
