//! Fingerprint image enhancement ahead of minutiae extraction.
//!
//! Stages run in a fixed order: grayscale, upscale to the working
//! resolution, tile-based contrast equalisation (CLAHE), edge-preserving
//! denoise, unsharp-mask sharpening. Every stage can be switched off by
//! configuring its parameter to zero or below.

use anyhow::{Result, anyhow};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use rayon::prelude::*;
use tracing::debug;

const DENOISE_WINDOW: u32 = 5;
const DENOISE_SPATIAL_SIGMA: f32 = 1.5;
const SHARPEN_SIGMA: f32 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    /// Images whose longer side is shorter than this are upscaled to it.
    pub target_long_side: u32,
    /// CLAHE clip limit, as a multiple of the mean histogram bin height.
    pub clip_limit: f32,
    /// Number of CLAHE tiles along each axis.
    pub tile_grid: u32,
    /// Bilateral filter strength in intensity units.
    pub denoise_strength: f32,
    /// Unsharp mask gain.
    pub sharpen_amount: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_long_side: 800,
            clip_limit: 2.0,
            tile_grid: 8,
            denoise_strength: 10.0,
            sharpen_amount: 1.0,
        }
    }
}

/// Output of the enhancer: a single-channel buffer for analysis and the
/// 3-channel buffer that extraction and rendering operate on.
#[derive(Debug, Clone)]
pub struct EnhancedImage {
    pub analysis: GrayImage,
    pub enhanced: RgbImage,
}

impl EnhancedImage {
    /// The un-enhanced buffers, used when enhancement fails.
    pub fn passthrough(image: &DynamicImage) -> Self {
        let gray = image.to_luma8();
        let enhanced = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
        Self { analysis: gray, enhanced }
    }
}

pub trait ImageEnhancer: Send + Sync {
    fn enhance(&self, image: &DynamicImage) -> Result<EnhancedImage>;
}

#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }
}

impl ImageEnhancer for ImagePreprocessor {
    fn enhance(&self, image: &DynamicImage) -> Result<EnhancedImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("Cannot enhance an empty image"));
        }

        let cfg = &self.config;
        let mut gray = image.to_luma8();

        if cfg.target_long_side > 0 {
            gray = upscale_to_long_side(&gray, cfg.target_long_side);
        }
        if cfg.clip_limit > 0.0 && cfg.tile_grid > 0 {
            gray = clahe(&gray, cfg.clip_limit, cfg.tile_grid);
        }
        if cfg.denoise_strength > 0.0 {
            gray = imageproc::filter::bilateral_filter(
                &gray,
                DENOISE_WINDOW,
                cfg.denoise_strength * 2.0,
                DENOISE_SPATIAL_SIGMA,
            );
        }
        if cfg.sharpen_amount > 0.0 {
            gray = unsharp_mask(&gray, cfg.sharpen_amount, SHARPEN_SIGMA);
        }

        debug!("Enhanced image to {}x{}", gray.width(), gray.height());

        let enhanced = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
        Ok(EnhancedImage { analysis: gray, enhanced })
    }
}

/// Upscale (never downscale) so the longer side reaches `target`, keeping the
/// aspect ratio.
pub fn upscale_to_long_side(image: &GrayImage, target: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let long = w.max(h);
    if long == 0 || long >= target {
        return image.clone();
    }

    let scale = target as f64 / long as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(image, new_w, new_h, FilterType::Lanczos3)
}

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into `grid x grid` tiles, each tile gets a clipped
/// histogram equalisation lookup table, and every pixel is mapped through a
/// bilinear blend of the four nearest tile tables.
pub fn clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let tiles_x = grid.min(w).max(1);
    let tiles_y = grid.min(h).max(1);
    let tile_w = (w + tiles_x - 1) / tiles_x;
    let tile_h = (h + tiles_y - 1) / tiles_y;

    let luts: Vec<[u8; 256]> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|idx| {
            let tx = idx % tiles_x;
            let ty = idx / tiles_x;
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            tile_lut(image, x0, y0, x1, y1, clip_limit)
        })
        .collect();

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

    let mut out = GrayImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = image.get_pixel(x, y)[0] as usize;

        // Position relative to tile centres.
        let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let gx = gx.clamp(0.0, (tiles_x - 1) as f32);
        let gy = gy.clamp(0.0, (tiles_y - 1) as f32);

        let tx0 = gx.floor() as u32;
        let ty0 = gy.floor() as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = gx - tx0 as f32;
        let fy = gy - ty0 as f32;

        let top = lut_at(tx0, ty0)[value] as f32 * (1.0 - fx) + lut_at(tx1, ty0)[value] as f32 * fx;
        let bottom = lut_at(tx0, ty1)[value] as f32 * (1.0 - fx) + lut_at(tx1, ty1)[value] as f32 * fx;
        let mapped = top * (1.0 - fy) + bottom * fy;

        *pixel = Luma([mapped.round().clamp(0.0, 255.0) as u8]);
    }
    out
}

fn tile_lut(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[image.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let area = ((x1 - x0) * (y1 - y0)).max(1);
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share;
        if i < remainder {
            *bin += 1;
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = ((cdf as f32 * 255.0 / area as f32).round()).min(255.0) as u8;
    }
    lut
}

/// `out = image + amount * (image - blur(image))`, clamped to the u8 range.
pub fn unsharp_mask(image: &GrayImage, amount: f32, sigma: f32) -> GrayImage {
    let blurred = gaussian_blur(image, sigma);
    let mut out = image.clone();
    for (dst, (src, blur)) in out.pixels_mut().zip(image.pixels().zip(blurred)) {
        let s = src[0] as f32;
        dst[0] = (s + amount * (s - blur)).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Weights over `[-r, r]` with `r = ceil(3 * sigma)`, summing to one.
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let weights: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Separable blur kept in f32 so the detail term is not quantised. Edges clamp.
fn gaussian_blur(image: &GrayImage, sigma: f32) -> Vec<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let src: Vec<f32> = image.pixels().map(|p| p[0] as f32).collect();

    let tap = |len: usize, at: usize, k: usize| {
        (at as isize + k as isize - radius).clamp(0, len as isize - 1) as usize
    };

    let mut horizontal = vec![0.0f32; w * h];
    horizontal.par_chunks_mut(w.max(1)).enumerate().for_each(|(y, row)| {
        for (x, dst) in row.iter_mut().enumerate() {
            *dst = kernel.iter().enumerate().map(|(k, wt)| wt * src[y * w + tap(w, x, k)]).sum();
        }
    });

    let mut out = vec![0.0f32; w * h];
    out.par_chunks_mut(w.max(1)).enumerate().for_each(|(y, row)| {
        for (x, dst) in row.iter_mut().enumerate() {
            *dst = kernel.iter().enumerate().map(|(k, wt)| wt * horizontal[tap(h, y, k) * w + x]).sum();
        }
    });
    out
}
