// Frame-difference signal.
//
// Absolute gray difference → binary threshold → open/close morphology →
// external contours. The score is the changed share of the mask; the
// contours' bounding rects become the changed-region list.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};

use crate::types::Rect;

pub(super) struct DiffOutcome {
    /// Changed pixels / total pixels, clamped to [0, 1].
    pub score: f64,
    /// Bounding rects of external contours, in working-image coordinates.
    pub regions: Vec<Rect>,
}

impl DiffOutcome {
    fn quiet() -> Self {
        DiffOutcome {
            score: 0.0,
            regions: Vec::new(),
        }
    }
}

/// Compare two gray working images.
///
/// `threshold` is normalized (0–1) and applied at `threshold * 255`;
/// `kernel_size` is the side of the square morphology kernel.
pub(super) fn frame_difference(
    current: &GrayImage,
    previous: &GrayImage,
    threshold: f64,
    kernel_size: u32,
) -> DiffOutcome {
    if current.dimensions() != previous.dimensions()
        || current.width() == 0
        || current.height() == 0
    {
        return DiffOutcome::quiet();
    }

    // Binarize the absolute difference. Strictly-greater comparison,
    // matching a plain binary threshold.
    let cutoff = threshold * 255.0;
    let mut mask = GrayImage::new(current.width(), current.height());
    for (mask_px, (cur, prev)) in mask
        .pixels_mut()
        .zip(current.pixels().zip(previous.pixels()))
    {
        let diff = cur.0[0].abs_diff(prev.0[0]);
        mask_px.0[0] = if f64::from(diff) > cutoff { 255 } else { 0 };
    }

    // Open to kill speckle, close to heal the surviving blobs. A kernel
    // of size k maps to a Chebyshev radius of k / 2; radius 0 is a no-op.
    let radius = kernel_size / 2;
    if radius > 0 {
        mask = open(&mask, Norm::LInf, radius as u8);
        mask = close(&mask, Norm::LInf, radius as u8);
    }

    let changed = mask.pixels().filter(|px| px.0[0] != 0).count();
    let total = (mask.width() * mask.height()) as usize;
    let score = (changed as f64 / total as f64).min(1.0);

    // External contours only; degenerate ones (< 3 points) are noise.
    let regions = find_contours::<i32>(&mask)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .filter(|contour| contour.points.len() >= 3)
        .map(|contour| bounding_rect(&contour.points))
        .collect();

    DiffOutcome { score, regions }
}

fn bounding_rect(points: &[imageproc::point::Point<i32>]) -> Rect {
    let mut min_x = i32::MAX;
    let mut min_y = i32::MAX;
    let mut max_x = i32::MIN;
    let mut max_y = i32::MIN;
    for point in points {
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
