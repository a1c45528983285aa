use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::Local;
use image::{DynamicImage, ImageReader};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::artifacts::remove_artifact;
use crate::extraction::error::PipelineError;
use crate::ingest::naming::{staging_base_name, StagingPaths};
use crate::media::mimetype::ensure_image;
use crate::media::preprocess::{EnhancedImage, ImageEnhancer};
use crate::media::render::MinutiaeRenderer;
use crate::ml::extractor::MinutiaeExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    PreparingPaths,
    LoadingImage,
    Enhancing,
    LoadingModels,
    Extracting,
    Rendering,
    Saving,
    Done,
    Failed,
}

impl RunState {
    pub fn message(self) -> &'static str {
        match self {
            RunState::Idle => "Waiting",
            RunState::PreparingPaths => "Preparing file names...",
            RunState::LoadingImage => "Loading fingerprint image...",
            RunState::Enhancing => "Enhancing image...",
            RunState::LoadingModels => "Loading detection models...",
            RunState::Extracting => "Extracting minutiae...",
            RunState::Rendering => "Drawing minutiae markers...",
            RunState::Saving => "Saving result image...",
            RunState::Done => "Extraction finished",
            RunState::Failed => "Extraction failed",
        }
    }
}

/// Per-run result. Nothing about a run is kept on the orchestrator itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub raw_path: PathBuf,
    pub result_path: PathBuf,
    pub count: usize,
    /// `false` when enhancement failed and the plain grayscale image was used.
    pub enhanced: bool,
}

/// Drives one extraction from raw upload to staged artifacts. Performs no
/// store writes; the caller persists the case after a successful run.
pub struct Orchestrator {
    staging_dir: PathBuf,
    enhancer: Arc<dyn ImageEnhancer>,
    extractor: Arc<dyn MinutiaeExtractor>,
    renderer: Arc<dyn MinutiaeRenderer>,
}

impl Orchestrator {
    pub fn new(
        staging_dir: &Path,
        enhancer: Arc<dyn ImageEnhancer>,
        extractor: Arc<dyn MinutiaeExtractor>,
        renderer: Arc<dyn MinutiaeRenderer>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.to_path_buf(),
            enhancer,
            extractor,
            renderer,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn renderer_name(&self) -> &'static str {
        self.renderer.name()
    }

    pub fn run(&self, raw: &Path, title: &str, progress: &dyn Fn(&str)) -> Result<RunOutcome, PipelineError> {
        debug!("Run state -> {:?} for {:?}", RunState::Idle, raw);
        let result = self.run_stages(raw, title, progress);
        match &result {
            Ok(outcome) => {
                progress(RunState::Done.message());
                info!("Run finished: {} minutiae, result at {:?}", outcome.count, outcome.result_path);
            }
            Err(e) => {
                progress(&format!("{}: {}", RunState::Failed.message(), e));
                error!("Run failed: {}", e);
            }
        }
        result
    }

    fn run_stages(&self, raw: &Path, title: &str, progress: &dyn Fn(&str)) -> Result<RunOutcome, PipelineError> {
        let enter = |state: RunState| {
            debug!("Run state -> {:?}", state);
            progress(state.message());
        };

        enter(RunState::PreparingPaths);
        fs::create_dir_all(&self.staging_dir).map_err(|e| {
            PipelineError::ImageLoadFailed(format!("cannot create staging directory {:?}: {}", self.staging_dir, e))
        })?;
        let base = staging_base_name(title, Local::now());
        let paths = StagingPaths::new(&self.staging_dir, &base);

        enter(RunState::LoadingImage);
        let decoded = load_raw(raw)?;
        if let Err(e) = decoded.to_luma8().save(&paths.raw) {
            remove_artifact(&paths.raw);
            return Err(PipelineError::ImageLoadFailed(format!(
                "cannot write snapshot {:?}: {}",
                paths.raw, e
            )));
        }
        debug!("Raw snapshot written to {:?}", paths.raw);

        enter(RunState::Enhancing);
        let (prepared, enhanced) = self.enhance(&decoded);

        enter(RunState::LoadingModels);
        self.extractor.verify_models()?;
        self.extractor.load_models()?;

        enter(RunState::Extracting);
        let extraction = match self.extractor.extract(&prepared) {
            Ok(extraction) => extraction,
            Err(e) => {
                // A result file can only exist here if an earlier run reused the name.
                remove_artifact(&paths.result);
                return Err(e);
            }
        };
        info!("Detected {} minutiae", extraction.count);

        enter(RunState::Rendering);
        let rendered = self.renderer.render(&prepared.enhanced, &extraction);

        enter(RunState::Saving);
        if let Err(e) = rendered.save(&paths.result) {
            remove_artifact(&paths.result);
            return Err(PipelineError::ExtractionFailed(format!(
                "cannot write result {:?}: {}",
                paths.result, e
            )));
        }

        Ok(RunOutcome {
            raw_path: paths.raw,
            result_path: paths.result,
            count: extraction.count,
            enhanced,
        })
    }

    /// Enhancement never ends a run. Errors and panics fall back to the
    /// un-enhanced buffers.
    fn enhance(&self, image: &DynamicImage) -> (EnhancedImage, bool) {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.enhancer.enhance(image)));
        let failure = match attempt {
            Ok(Ok(prepared)) => return (prepared, true),
            Ok(Err(e)) => PipelineError::EnhancementFailed(format!("{:#}", e)),
            Err(_) => PipelineError::EnhancementFailed("enhancer panicked".to_string()),
        };
        warn!("{}; continuing with the un-enhanced image", failure);
        (EnhancedImage::passthrough(image), false)
    }
}

fn load_raw(raw: &Path) -> Result<DynamicImage, PipelineError> {
    let mime = ensure_image(raw).map_err(|e| PipelineError::ImageLoadFailed(format!("{:#}", e)))?;
    debug!("Raw upload {:?} is {}", raw, mime);
    let load_failed = |e: &dyn std::fmt::Display| PipelineError::ImageLoadFailed(format!("{:?}: {}", raw, e));
    // Decode by content; uploads often carry the wrong extension or none.
    ImageReader::open(raw)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| load_failed(&e))?
        .decode()
        .map_err(|e| load_failed(&e))
}
