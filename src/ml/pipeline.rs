use ndarray::{Array, Array4, ArrayView2};
use image::{GrayImage, Luma, RgbImage};

/// Output maps of the coarse and orientation stages are this many times
/// smaller than the input.
pub const MAP_STRIDE: u32 = 8;
pub const PATCH_SIZE: u32 = 64;

/// Pad right and bottom with white so both sides are multiples of `stride`.
pub fn pad_to_stride(image: &GrayImage, stride: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let pw = ((w + stride - 1) / stride).max(1) * stride;
    let ph = ((h + stride - 1) / stride).max(1) * stride;
    if (pw, ph) == (w, h) {
        return image.clone();
    }

    let mut padded = GrayImage::from_pixel(pw, ph, Luma([255]));
    image::imageops::replace(&mut padded, image, 0, 0);
    padded
}

/// Coarse/orientation input: `[1, 1, H, W]`, pixel values scaled to 0.0-1.0.
pub fn normalize_for_coarse(image: &GrayImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut array = Array::zeros((1, 1, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        array[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
    }

    array
}

/// Fine/classify input: a `[1, 3, size, size]` patch centred on a candidate.
/// Area outside the image reads as white.
pub fn patch_for_fine(image: &RgbImage, cx: i64, cy: i64, size: u32) -> Array4<f32> {
    let n = size as usize;
    let mut array = Array::from_elem((1, 3, n, n), 1.0f32);
    let half = size as i64 / 2;
    let (w, h) = (image.width() as i64, image.height() as i64);

    for py in 0..n {
        let sy = cy - half + py as i64;
        if sy < 0 || sy >= h {
            continue;
        }
        for px in 0..n {
            let sx = cx - half + px as i64;
            if sx < 0 || sx >= w {
                continue;
            }
            let pixel = image.get_pixel(sx as u32, sy as u32);
            for c in 0..3 {
                array[[0, c, py, px]] = pixel[c] as f32 / 255.0;
            }
        }
    }

    array
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub row: usize,
    pub col: usize,
    pub score: f32,
}

/// Local maxima of a score map above `threshold`, strongest first, with any
/// peak closer than `radius` cells to a stronger one suppressed.
pub fn score_peaks(map: ArrayView2<f32>, threshold: f32, radius: usize) -> Vec<Peak> {
    let (rows, cols) = map.dim();
    let mut candidates = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            let v = map[[r, c]];
            if !v.is_finite() || v < threshold {
                continue;
            }
            let r0 = r.saturating_sub(1);
            let c0 = c.saturating_sub(1);
            let r1 = (r + 1).min(rows - 1);
            let c1 = (c + 1).min(cols - 1);
            let is_max = (r0..=r1)
                .flat_map(|rr| (c0..=c1).map(move |cc| (rr, cc)))
                .all(|(rr, cc)| map[[rr, cc]] <= v);
            if is_max {
                candidates.push(Peak { row: r, col: c, score: v });
            }
        }
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let min_dist2 = (radius * radius) as i64;
    let mut kept: Vec<Peak> = Vec::new();
    for peak in candidates {
        let suppressed = kept.iter().any(|k| {
            let dr = k.row as i64 - peak.row as i64;
            let dc = k.col as i64 - peak.col as i64;
            dr * dr + dc * dc < min_dist2
        });
        if !suppressed {
            kept.push(peak);
        }
    }
    kept
}

pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}
