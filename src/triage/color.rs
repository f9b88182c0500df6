// Color-distribution signal.
//
// Both working images are box-downsampled by 4, converted to HSV, and
// compared through min-max-normalized hue histograms (Pearson
// correlation). Optionally a small k-means picks three dominant colors.

use image::RgbImage;

/// Hue histogram correlation between two same-size RGB images.
///
/// Returns `clamp(1 - correlation, 0, 1)`: identical distributions give
/// 0, unrelated ones approach 1.
pub(super) fn color_change(current: &RgbImage, previous: &RgbImage, bins: usize) -> f64 {
    if current.dimensions() != previous.dimensions()
        || current.width() == 0
        || current.height() == 0
        || bins == 0
    {
        return 0.0;
    }

    let current_small = downsample4(current);
    let previous_small = downsample4(previous);

    let current_hist = normalize(hue_histogram(&current_small, bins));
    let previous_hist = normalize(hue_histogram(&previous_small, bins));

    let corr = correlation(&current_hist, &previous_hist);
    (1.0 - corr).clamp(0.0, 1.0)
}

/// Mean-of-4x4-block downsample (area interpolation for a x4 factor).
pub(super) fn downsample4(img: &RgbImage) -> RgbImage {
    let out_w = (img.width() / 4).max(1);
    let out_h = (img.height() / 4).max(1);
    let mut out = RgbImage::new(out_w, out_h);

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sums = [0u32; 3];
            let mut count = 0u32;
            for dy in 0..4 {
                for dx in 0..4 {
                    let x = ox * 4 + dx;
                    let y = oy * 4 + dy;
                    if x < img.width() && y < img.height() {
                        let px = img.get_pixel(x, y);
                        sums[0] += px.0[0] as u32;
                        sums[1] += px.0[1] as u32;
                        sums[2] += px.0[2] as u32;
                        count += 1;
                    }
                }
            }
            let px = out.get_pixel_mut(ox, oy);
            for c in 0..3 {
                px.0[c] = ((sums[c] + count / 2) / count) as u8;
            }
        }
    }

    out
}

/// Byte hue per the OpenCV 8-bit convention: degrees / 2, so the channel
/// spans 0–180 inside a 0–255 range.
fn hue_byte(r: u8, g: u8, b: u8) -> u8 {
    let r = r as f64 / 255.0;
    let g = g as f64 / 255.0;
    let b = b as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta <= f64::EPSILON {
        return 0;
    }

    let mut hue = if (max - r).abs() < f64::EPSILON {
        60.0 * (g - b) / delta
    } else if (max - g).abs() < f64::EPSILON {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    (hue / 2.0).round().min(255.0) as u8
}

/// Histogram of the hue channel with `bins` buckets over [0, 256).
fn hue_histogram(img: &RgbImage, bins: usize) -> Vec<f64> {
    let mut hist = vec![0.0f64; bins];
    for px in img.pixels() {
        let hue = hue_byte(px.0[0], px.0[1], px.0[2]) as usize;
        hist[(hue * bins) / 256] += 1.0;
    }
    hist
}

/// Min-max normalization to [0, 1]; a constant histogram maps to zeros.
fn normalize(hist: Vec<f64>) -> Vec<f64> {
    let min = hist.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = hist.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= f64::EPSILON {
        return vec![0.0; hist.len()];
    }
    hist.into_iter().map(|v| (v - min) / range).collect()
}

/// Pearson correlation; 1.0 when either side has zero variance.
fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = var_a * var_b;
    if denom.abs() <= f64::EPSILON {
        1.0
    } else {
        cov / denom.sqrt()
    }
}

// ---------------------------------------------------------------------------
// Dominant colors
// ---------------------------------------------------------------------------

const KMEANS_K: usize = 3;
const KMEANS_MAX_ITERATIONS: usize = 10;
const KMEANS_EPSILON: f64 = 1.0;
const KMEANS_ATTEMPTS: usize = 3;

/// Three dominant colors of the (already downsampled) image as RGB
/// floats in [0, 1], via k-means++ over the pixel cloud.
pub(super) fn dominant_colors(img: &RgbImage) -> Vec<f32> {
    let samples: Vec<[f64; 3]> = img
        .pixels()
        .map(|px| [px.0[0] as f64, px.0[1] as f64, px.0[2] as f64])
        .collect();
    if samples.len() < KMEANS_K {
        return Vec::new();
    }

    // Fixed seed: dominant-color output must be reproducible.
    let mut rng = XorShift64::new(0x9E37_79B9_7F4A_7C15);

    let mut best_centers: Option<(Vec<[f64; 3]>, f64)> = None;
    for _ in 0..KMEANS_ATTEMPTS {
        let (centers, inertia) = kmeans_once(&samples, &mut rng);
        if best_centers
            .as_ref()
            .map(|(_, best)| inertia < *best)
            .unwrap_or(true)
        {
            best_centers = Some((centers, inertia));
        }
    }

    best_centers
        .map(|(centers, _)| {
            centers
                .iter()
                .flat_map(|c| c.iter().map(|v| (*v / 255.0) as f32))
                .collect()
        })
        .unwrap_or_default()
}

fn kmeans_once(samples: &[[f64; 3]], rng: &mut XorShift64) -> (Vec<[f64; 3]>, f64) {
    let mut centers = kmeans_pp_init(samples, rng);
    let mut assignment = vec![0usize; samples.len()];

    for _ in 0..KMEANS_MAX_ITERATIONS {
        // Assign.
        for (i, sample) in samples.iter().enumerate() {
            assignment[i] = nearest_center(sample, &centers).0;
        }

        // Update.
        let mut sums = vec![[0.0f64; 3]; centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for (sample, &cluster) in samples.iter().zip(assignment.iter()) {
            for c in 0..3 {
                sums[cluster][c] += sample[c];
            }
            counts[cluster] += 1;
        }

        let mut movement = 0.0f64;
        for (k, center) in centers.iter_mut().enumerate() {
            if counts[k] == 0 {
                // Re-seed an empty cluster on a random sample.
                *center = samples[rng.next_index(samples.len())];
                movement = f64::INFINITY;
                continue;
            }
            let new = [
                sums[k][0] / counts[k] as f64,
                sums[k][1] / counts[k] as f64,
                sums[k][2] / counts[k] as f64,
            ];
            movement = movement.max(distance(center, &new).sqrt());
            *center = new;
        }

        if movement < KMEANS_EPSILON {
            break;
        }
    }

    let inertia = samples
        .iter()
        .map(|sample| nearest_center(sample, &centers).1)
        .sum();
    (centers, inertia)
}

/// k-means++ seeding: first center uniform, the rest proportional to the
/// squared distance from the nearest chosen center.
fn kmeans_pp_init(samples: &[[f64; 3]], rng: &mut XorShift64) -> Vec<[f64; 3]> {
    let mut centers = Vec::with_capacity(KMEANS_K);
    centers.push(samples[rng.next_index(samples.len())]);

    while centers.len() < KMEANS_K {
        let weights: Vec<f64> = samples
            .iter()
            .map(|sample| nearest_center(sample, &centers).1)
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= f64::EPSILON {
            // All mass on existing centers: fall back to uniform picks.
            centers.push(samples[rng.next_index(samples.len())]);
            continue;
        }

        let mut target = rng.next_f64() * total;
        let mut chosen = samples.len() - 1;
        for (i, weight) in weights.iter().enumerate() {
            target -= weight;
            if target <= 0.0 {
                chosen = i;
                break;
            }
        }
        centers.push(samples[chosen]);
    }

    centers
}

fn nearest_center(sample: &[f64; 3], centers: &[[f64; 3]]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, center) in centers.iter().enumerate() {
        let d = distance(sample, center);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// xorshift64*; enough randomness for seeding, fully deterministic.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        XorShift64 {
            state: seed.max(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }
}
