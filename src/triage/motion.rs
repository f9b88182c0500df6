// Sparse optical-flow signal.
//
// Shi-Tomasi (minimum-eigenvalue) corners are detected on the previous
// gray image and tracked into the current one with iterative pyramidal
// Lucas-Kanade. The score is the mean displacement over valid tracks,
// normalized by 50 px; strongly moving points vote for one convex-hull
// motion region.

use image::GrayImage;
use imageproc::geometry::convex_hull;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use imageproc::point::Point;

use crate::types::Rect;

// Corner detection.
const QUALITY_LEVEL: f64 = 0.01;
const MIN_CORNER_DISTANCE: f64 = 10.0;
const BLOCK_RADIUS: u32 = 1; // 3x3 block

// Lucas-Kanade.
const LK_WINDOW_RADIUS: i32 = 7; // 15x15 window
const PYRAMID_DEPTH: usize = 2; // coarsest level; 0 is full resolution
const LK_MAX_ITERATIONS: usize = 10;
const LK_EPSILON: f64 = 0.03;

// Scoring.
const SCORE_NORMALIZER: f64 = 50.0;
const MOTION_REGION_MIN_POINTS: usize = 5;

pub(super) struct MotionOutcome {
    /// Mean track displacement / 50, clamped to [0, 1].
    pub score: f64,
    /// At most one convex-hull bounding rect of the fast movers.
    pub regions: Vec<Rect>,
}

impl MotionOutcome {
    fn still() -> Self {
        MotionOutcome {
            score: 0.0,
            regions: Vec::new(),
        }
    }
}

/// Track motion from `previous` to `current`.
///
/// `max_points` is the corner budget; `motion_threshold` (normalized) is
/// scaled by 10 to a pixel displacement when selecting region points.
pub(super) fn detect_motion(
    current: &GrayImage,
    previous: &GrayImage,
    max_points: usize,
    motion_threshold: f64,
) -> MotionOutcome {
    if current.dimensions() != previous.dimensions()
        || current.width() < 16
        || current.height() < 16
        || max_points == 0
    {
        return MotionOutcome::still();
    }

    let corners = shi_tomasi_corners(previous, max_points);
    if corners.is_empty() {
        return MotionOutcome::still();
    }

    let prev_pyramid = build_pyramid(previous);
    let cur_pyramid = build_pyramid(current);

    let mut total_motion = 0.0;
    let mut valid_tracks = 0usize;
    let mut moving_points: Vec<(f64, f64)> = Vec::new();
    let region_cutoff = motion_threshold * 10.0;

    for &(x, y) in &corners {
        if let Some((nx, ny)) = track_point(&prev_pyramid, &cur_pyramid, x, y) {
            let dx = nx - x;
            let dy = ny - y;
            let magnitude = (dx * dx + dy * dy).sqrt();
            total_motion += magnitude;
            valid_tracks += 1;

            if magnitude > region_cutoff {
                moving_points.push((x, y));
            }
        }
    }

    if valid_tracks == 0 {
        return MotionOutcome::still();
    }

    let avg_motion = total_motion / valid_tracks as f64;
    let score = (avg_motion / SCORE_NORMALIZER).min(1.0);

    let mut regions = Vec::new();
    if moving_points.len() > MOTION_REGION_MIN_POINTS {
        let points: Vec<Point<i32>> = moving_points
            .iter()
            .map(|&(x, y)| Point::new(x.round() as i32, y.round() as i32))
            .collect();
        let hull = convex_hull(points);
        if hull.len() >= 3 {
            regions.push(hull_bounding_rect(&hull));
        }
    }

    MotionOutcome { score, regions }
}

// ---------------------------------------------------------------------------
// Shi-Tomasi corners
// ---------------------------------------------------------------------------

/// Minimum-eigenvalue corners: responses above `QUALITY_LEVEL` of the
/// best one, greedily thinned to `MIN_CORNER_DISTANCE`, strongest first.
fn shi_tomasi_corners(img: &GrayImage, max_points: usize) -> Vec<(f64, f64)> {
    let width = img.width() as i32;
    let height = img.height() as i32;

    let gx = horizontal_sobel(img);
    let gy = vertical_sobel(img);

    let margin = 1 + BLOCK_RADIUS as i32;
    let mut candidates: Vec<(f64, i32, i32)> = Vec::new();
    let mut max_response = 0.0f64;

    for y in margin..height - margin {
        for x in margin..width - margin {
            // Structure tensor over the block.
            let mut a = 0.0f64;
            let mut b = 0.0f64;
            let mut c = 0.0f64;
            for dy in -(BLOCK_RADIUS as i32)..=BLOCK_RADIUS as i32 {
                for dx in -(BLOCK_RADIUS as i32)..=BLOCK_RADIUS as i32 {
                    let ix = gx.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as f64;
                    let iy = gy.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as f64;
                    a += ix * ix;
                    b += ix * iy;
                    c += iy * iy;
                }
            }

            // Smaller eigenvalue of [[a, b], [b, c]].
            let response = 0.5 * ((a + c) - ((a - c) * (a - c) + 4.0 * b * b).sqrt());
            if response > 0.0 {
                max_response = max_response.max(response);
                candidates.push((response, x, y));
            }
        }
    }

    if candidates.is_empty() || max_response <= 0.0 {
        return Vec::new();
    }

    let cutoff = max_response * QUALITY_LEVEL;
    candidates.retain(|&(response, _, _)| response >= cutoff);
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let min_dist_sq = MIN_CORNER_DISTANCE * MIN_CORNER_DISTANCE;
    let mut accepted: Vec<(f64, f64)> = Vec::new();
    for (_, x, y) in candidates {
        if accepted.len() >= max_points {
            break;
        }
        let (fx, fy) = (x as f64, y as f64);
        let crowded = accepted
            .iter()
            .any(|&(ax, ay)| (ax - fx) * (ax - fx) + (ay - fy) * (ay - fy) < min_dist_sq);
        if !crowded {
            accepted.push((fx, fy));
        }
    }

    accepted
}

// ---------------------------------------------------------------------------
// Pyramidal Lucas-Kanade
// ---------------------------------------------------------------------------

fn build_pyramid(img: &GrayImage) -> Vec<GrayImage> {
    let mut levels = Vec::with_capacity(PYRAMID_DEPTH + 1);
    levels.push(img.clone());
    for _ in 0..PYRAMID_DEPTH {
        let prev = levels.last().expect("pyramid never empty");
        if prev.width() < 2 || prev.height() < 2 {
            break;
        }
        levels.push(halve(prev));
    }
    levels
}

/// 2x2 box-mean downsample.
fn halve(img: &GrayImage) -> GrayImage {
    let out_w = img.width() / 2;
    let out_h = img.height() / 2;
    let mut out = GrayImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let sum = img.get_pixel(x * 2, y * 2).0[0] as u32
                + img.get_pixel(x * 2 + 1, y * 2).0[0] as u32
                + img.get_pixel(x * 2, y * 2 + 1).0[0] as u32
                + img.get_pixel(x * 2 + 1, y * 2 + 1).0[0] as u32;
            out.put_pixel(x, y, image::Luma([((sum + 2) / 4) as u8]));
        }
    }
    out
}

/// Bilinear sample with border clamping.
fn sample(img: &GrayImage, x: f64, y: f64) -> f64 {
    let max_x = (img.width() - 1) as f64;
    let max_y = (img.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);
    let fx = x - x0;
    let fy = y - y0;

    let p00 = img.get_pixel(x0 as u32, y0 as u32).0[0] as f64;
    let p10 = img.get_pixel(x1 as u32, y0 as u32).0[0] as f64;
    let p01 = img.get_pixel(x0 as u32, y1 as u32).0[0] as f64;
    let p11 = img.get_pixel(x1 as u32, y1 as u32).0[0] as f64;

    p00 * (1.0 - fx) * (1.0 - fy) + p10 * fx * (1.0 - fy) + p01 * (1.0 - fx) * fy + p11 * fx * fy
}

/// Track one point through the pyramid. Returns the position in the
/// current image, or `None` when the track leaves the image or the
/// gradient matrix degenerates.
fn track_point(
    prev_pyramid: &[GrayImage],
    cur_pyramid: &[GrayImage],
    x: f64,
    y: f64,
) -> Option<(f64, f64)> {
    let depth = prev_pyramid.len().min(cur_pyramid.len());
    if depth == 0 {
        return None;
    }

    // Flow guess propagated from the coarsest level.
    let mut gx = 0.0f64;
    let mut gy = 0.0f64;

    for level in (0..depth).rev() {
        let prev = &prev_pyramid[level];
        let cur = &cur_pyramid[level];
        let scale = (1 << level) as f64;
        let px = x / scale;
        let py = y / scale;

        let radius = LK_WINDOW_RADIUS as f64;
        if px - radius < 1.0
            || py - radius < 1.0
            || px + radius >= (prev.width() - 1) as f64
            || py + radius >= (prev.height() - 1) as f64
        {
            // Window does not fit at this level; try the finer ones with
            // whatever guess has accumulated.
            if level > 0 {
                gx *= 2.0;
                gy *= 2.0;
            }
            continue;
        }

        // Spatial gradients over the template window (central differences
        // on the previous image), fixed for all iterations at this level.
        let window = (2 * LK_WINDOW_RADIUS + 1) as usize;
        let mut ix = vec![0.0f64; window * window];
        let mut iy = vec![0.0f64; window * window];
        let mut template = vec![0.0f64; window * window];
        let mut g11 = 0.0f64;
        let mut g12 = 0.0f64;
        let mut g22 = 0.0f64;

        for (wy, dy) in (-LK_WINDOW_RADIUS..=LK_WINDOW_RADIUS).enumerate() {
            for (wx, dx) in (-LK_WINDOW_RADIUS..=LK_WINDOW_RADIUS).enumerate() {
                let sx = px + dx as f64;
                let sy = py + dy as f64;
                let dx_val = (sample(prev, sx + 1.0, sy) - sample(prev, sx - 1.0, sy)) * 0.5;
                let dy_val = (sample(prev, sx, sy + 1.0) - sample(prev, sx, sy - 1.0)) * 0.5;
                let idx = wy * window + wx;
                ix[idx] = dx_val;
                iy[idx] = dy_val;
                template[idx] = sample(prev, sx, sy);
                g11 += dx_val * dx_val;
                g12 += dx_val * dy_val;
                g22 += dy_val * dy_val;
            }
        }

        let det = g11 * g22 - g12 * g12;
        if det.abs() < 1e-7 {
            return None;
        }

        // Iterative refinement of the flow at this level.
        let mut vx = 0.0f64;
        let mut vy = 0.0f64;
        for _ in 0..LK_MAX_ITERATIONS {
            let mut b1 = 0.0f64;
            let mut b2 = 0.0f64;
            for (wy, dy) in (-LK_WINDOW_RADIUS..=LK_WINDOW_RADIUS).enumerate() {
                for (wx, dx) in (-LK_WINDOW_RADIUS..=LK_WINDOW_RADIUS).enumerate() {
                    let idx = wy * window + wx;
                    let cx = px + dx as f64 + gx + vx;
                    let cy = py + dy as f64 + gy + vy;
                    let diff = template[idx] - sample(cur, cx, cy);
                    b1 += diff * ix[idx];
                    b2 += diff * iy[idx];
                }
            }

            let step_x = (g22 * b1 - g12 * b2) / det;
            let step_y = (g11 * b2 - g12 * b1) / det;
            vx += step_x;
            vy += step_y;

            if (step_x * step_x + step_y * step_y).sqrt() < LK_EPSILON {
                break;
            }
        }

        gx += vx;
        gy += vy;
        if level > 0 {
            gx *= 2.0;
            gy *= 2.0;
        }
    }

    let nx = x + gx;
    let ny = y + gy;
    let full = &cur_pyramid[0];
    if nx < 0.0 || ny < 0.0 || nx >= full.width() as f64 || ny >= full.height() as f64 {
        return None;
    }

    Some((nx, ny))
}

fn hull_bounding_rect(hull: &[Point<i32>]) -> Rect {
    let mut min_x = i32::MAX;
    let mut min_y = i32::MAX;
    let mut max_x = i32::MIN;
    let mut max_y = i32::MIN;
    for point in hull {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Rect::new(
        min_x,
        min_y,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}
