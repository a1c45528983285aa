use std::path::Path;
use std::sync::{Arc, Mutex};
use anyhow::{Result, Context, anyhow};
use image::RgbImage;
use ndarray::{Array2, ArrayView2, ArrayViewD};
use ort::session::Session;
use tracing::{debug, info};

use crate::extraction::error::PipelineError;
use crate::media::preprocess::EnhancedImage;
use crate::ml::engine::{InferenceEngine, ModelFiles, ModelStamp};
use crate::ml::minutia::{Extraction, MinutiaPoint};
use crate::ml::pipeline::{self, MAP_STRIDE, PATCH_SIZE};

/// Boundary to the feature detector.
pub trait MinutiaeExtractor: Send + Sync {
    /// Check that every model artifact is present without loading any.
    fn verify_models(&self) -> Result<(), PipelineError>;

    /// Load (or reuse) the models ahead of inference.
    fn load_models(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn extract(&self, image: &EnhancedImage) -> Result<Extraction, PipelineError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    pub coarse_threshold: f32,
    /// Suppression radius in score-map cells.
    pub nms_radius: usize,
    pub fine_threshold: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            coarse_threshold: 0.5,
            nms_radius: 2,
            fine_threshold: 0.5,
        }
    }
}

struct CachedEngine {
    stamp: ModelStamp,
    engine: Arc<InferenceEngine>,
}

/// ONNX-backed detector. Loaded sessions are kept between runs and reloaded
/// only when one of the model files changes on disk.
pub struct OnnxExtractor {
    files: ModelFiles,
    params: DetectorParams,
    cache: Mutex<Option<CachedEngine>>,
}

impl OnnxExtractor {
    pub fn new(model_dir: &Path, params: DetectorParams) -> Self {
        Self {
            files: ModelFiles::in_dir(model_dir),
            params,
            cache: Mutex::new(None),
        }
    }

    pub fn files(&self) -> &ModelFiles {
        &self.files
    }

    fn engine(&self) -> Result<Arc<InferenceEngine>, PipelineError> {
        self.files.verify()?;
        let stamp = self
            .files
            .stamp()
            .map_err(|e| PipelineError::ModelMissing(format!("{:#}", e)))?;

        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cached) = cache.as_ref() {
            if cached.stamp == stamp {
                debug!("Reusing loaded detector models");
                return Ok(cached.engine.clone());
            }
            info!("Model files changed on disk, reloading");
        }

        let engine = Arc::new(InferenceEngine::new(&self.files).map_err(PipelineError::extraction)?);
        *cache = Some(CachedEngine { stamp, engine: engine.clone() });
        Ok(engine)
    }

    fn detect(&self, engine: &InferenceEngine, prepared: &EnhancedImage) -> Result<Vec<MinutiaPoint>> {
        let image: &RgbImage = &prepared.enhanced;
        let padded = pipeline::pad_to_stride(&prepared.analysis, MAP_STRIDE);
        let input = pipeline::normalize_for_coarse(&padded);

        let scores = run_map(engine.coarse_session(), input.view().into_dyn())
            .context("Coarse localisation failed")?;
        let orientation = run_map(engine.core_session(), input.view().into_dyn())
            .context("Orientation estimation failed")?;

        let peaks = pipeline::score_peaks(scores.view(), self.params.coarse_threshold, self.params.nms_radius);
        debug!("Coarse stage produced {} candidates", peaks.len());

        let (w, h) = image.dimensions();
        let mut points = Vec::with_capacity(peaks.len());
        for peak in peaks {
            let cx = peak.col as u32 * MAP_STRIDE + MAP_STRIDE / 2;
            let cy = peak.row as u32 * MAP_STRIDE + MAP_STRIDE / 2;
            if cx >= w || cy >= h {
                continue;
            }

            let patch = pipeline::patch_for_fine(image, cx as i64, cy as i64, PATCH_SIZE);
            let fine = run_scores(engine.fine_session(), patch.view().into_dyn())
                .context("Fine localisation failed")?;
            let probability = fine.first().copied().unwrap_or(0.0);
            if probability < self.params.fine_threshold {
                continue;
            }

            let logits = run_scores(engine.classify_session(), patch.view().into_dyn())
                .context("Classification failed")?;

            points.push(MinutiaPoint {
                angle: sample(orientation.view(), peak.row, peak.col),
                class: pipeline::argmax(&logits).map(|c| c as u8),
                score: Some(peak.score * probability),
                ..MinutiaPoint::at(cx as f32, cy as f32)
            });
        }
        Ok(points)
    }
}

impl MinutiaeExtractor for OnnxExtractor {
    fn verify_models(&self) -> Result<(), PipelineError> {
        self.files.verify()
    }

    fn load_models(&self) -> Result<(), PipelineError> {
        self.engine().map(|_| ())
    }

    fn extract(&self, image: &EnhancedImage) -> Result<Extraction, PipelineError> {
        let engine = self.engine()?;
        let points = self.detect(&engine, image).map_err(PipelineError::extraction)?;
        Ok(Extraction::from_points(points))
    }
}

/// Run a session and read output 0 as a 2-D map (first batch item, first channel).
fn run_map(session: &Session, input: ArrayViewD<f32>) -> Result<Array2<f32>> {
    let outputs = session.run(ort::inputs![input]?)?;
    let tensor = outputs[0].try_extract_tensor::<f32>()?;
    let shape = tensor.shape().to_vec();
    if shape.len() < 2 {
        return Err(anyhow!("Expected a 2-D map output, got shape {:?}", shape));
    }
    let (rows, cols) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    let values: Vec<f32> = tensor.iter().take(rows * cols).copied().collect();
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// Run a session and flatten output 0.
fn run_scores(session: &Session, input: ArrayViewD<f32>) -> Result<Vec<f32>> {
    let outputs = session.run(ort::inputs![input]?)?;
    let tensor = outputs[0].try_extract_tensor::<f32>()?;
    Ok(tensor.iter().copied().collect())
}

fn sample(map: ArrayView2<f32>, row: usize, col: usize) -> Option<f32> {
    map.get([row, col]).copied().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_without_models_is_model_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let extractor = OnnxExtractor::new(dir.path(), DetectorParams::default());
        let image = EnhancedImage::passthrough(&image::DynamicImage::new_rgb8(16, 16));

        assert!(matches!(extractor.verify_models(), Err(PipelineError::ModelMissing(_))));
        assert!(matches!(extractor.extract(&image), Err(PipelineError::ModelMissing(_))));
        Ok(())
    }

    #[test]
    fn test_sample_skips_out_of_range() {
        let map = Array2::from_shape_vec((1, 2), vec![0.5, f32::NAN]).unwrap();
        assert_eq!(sample(map.view(), 0, 0), Some(0.5));
        assert_eq!(sample(map.view(), 0, 1), None);
        assert_eq!(sample(map.view(), 3, 3), None);
    }
}
