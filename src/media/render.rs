//! Minutiae overlay rendering.
//!
//! Renderers are chosen once from a ranked list of provider names when the
//! process starts; the built-in dot renderer always closes the list so a
//! selection never fails.

use std::sync::Arc;
use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut};
use tracing::{info, warn};

use crate::ml::minutia::Extraction;

pub const DOT: &str = "dot";
pub const ORIENTED: &str = "oriented";

const MARKER_RED: Rgb<u8> = Rgb([255, 0, 0]);

const CLASS_PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([0, 200, 0]),
    Rgb([0, 120, 255]),
    Rgb([255, 200, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 220, 220]),
];

pub trait MinutiaeRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Draw markers on a copy of `base`. Never fails because of a single bad
    /// point, and returns `base` unchanged when nothing was detected.
    fn render(&self, base: &RgbImage, extraction: &Extraction) -> RgbImage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub marker_radius: i32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { marker_radius: 5 }
    }
}

/// Filled disc at every point.
#[derive(Debug, Clone)]
pub struct DotRenderer {
    radius: i32,
}

impl DotRenderer {
    pub fn new(opts: &RenderOptions) -> Self {
        Self { radius: opts.marker_radius.max(1) }
    }
}

impl MinutiaeRenderer for DotRenderer {
    fn name(&self) -> &'static str {
        DOT
    }

    fn render(&self, base: &RgbImage, extraction: &Extraction) -> RgbImage {
        let mut canvas = base.clone();
        if extraction.count == 0 {
            return canvas;
        }
        for point in &extraction.points {
            if let Some(center) = point.pixel() {
                draw_filled_circle_mut(&mut canvas, center, self.radius, MARKER_RED);
            }
        }
        canvas
    }
}

/// Ring coloured by minutia class with a tick along the ridge direction.
#[derive(Debug, Clone)]
pub struct OrientedRenderer {
    radius: i32,
}

impl OrientedRenderer {
    pub fn new(opts: &RenderOptions) -> Result<Self> {
        if opts.marker_radius < 3 {
            return Err(anyhow!(
                "oriented markers need a radius of at least 3, got {}",
                opts.marker_radius
            ));
        }
        Ok(Self { radius: opts.marker_radius })
    }
}

impl MinutiaeRenderer for OrientedRenderer {
    fn name(&self) -> &'static str {
        ORIENTED
    }

    fn render(&self, base: &RgbImage, extraction: &Extraction) -> RgbImage {
        let mut canvas = base.clone();
        if extraction.count == 0 {
            return canvas;
        }
        for point in &extraction.points {
            let Some(center) = point.pixel() else { continue };
            let color = point
                .class
                .map(|c| CLASS_PALETTE[c as usize % CLASS_PALETTE.len()])
                .unwrap_or(MARKER_RED);

            draw_hollow_circle_mut(&mut canvas, center, self.radius, color);

            if let Some(angle) = point.angle.filter(|a| a.is_finite()) {
                let len = (self.radius * 3) as f32;
                let start = (center.0 as f32, center.1 as f32);
                let end = (start.0 + len * angle.cos(), start.1 - len * angle.sin());
                draw_line_segment_mut(&mut canvas, start, end, color);
            }
        }
        canvas
    }
}

fn build(name: &str, opts: &RenderOptions) -> Result<Arc<dyn MinutiaeRenderer>> {
    match name {
        ORIENTED => Ok(Arc::new(OrientedRenderer::new(opts)?)),
        DOT => Ok(Arc::new(DotRenderer::new(opts))),
        other => Err(anyhow!("unknown renderer '{}'", other)),
    }
}

/// Try each ranked candidate in order and keep the first that can be built.
/// Falls back to the dot renderer when none is available.
pub fn select_renderer(candidates: &[String], opts: &RenderOptions) -> Arc<dyn MinutiaeRenderer> {
    for name in candidates {
        match build(name.trim(), opts) {
            Ok(renderer) => {
                info!("Using '{}' minutiae renderer", renderer.name());
                return renderer;
            }
            Err(e) => warn!("Renderer '{}' unavailable: {}", name, e),
        }
    }
    warn!("No configured renderer available, falling back to '{}'", DOT);
    Arc::new(DotRenderer::new(opts))
}
