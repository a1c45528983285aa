use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use ort::session::Session;
use anyhow::{Result, Context};
use tracing::info;

use crate::extraction::error::PipelineError;

pub const COARSE_NET: &str = "CoarseNet.onnx";
pub const FINE_NET: &str = "FineNet.onnx";
pub const CLASSIFY_NET: &str = "ClassifyNet_6_classes.onnx";
pub const CORE_NET: &str = "CoreNet.onnx";

/// Locations of the four detector stages inside a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub coarse: PathBuf,
    pub fine: PathBuf,
    pub classify: PathBuf,
    pub core: PathBuf,
}

/// Modification time and length of every model file, used to notice when a
/// loaded engine has gone stale.
pub type ModelStamp = [(Option<SystemTime>, u64); 4];

impl ModelFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            coarse: dir.join(COARSE_NET),
            fine: dir.join(FINE_NET),
            classify: dir.join(CLASSIFY_NET),
            core: dir.join(CORE_NET),
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.coarse, &self.fine, &self.classify, &self.core]
    }

    pub fn missing(&self) -> Vec<&Path> {
        self.all().into_iter().filter(|p| !p.is_file()).collect()
    }

    /// Existence check only; nothing is loaded.
    pub fn verify(&self) -> Result<(), PipelineError> {
        let missing = self.missing();
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
        Err(PipelineError::ModelMissing(names.join(", ")))
    }

    pub fn stamp(&self) -> Result<ModelStamp> {
        let read = |path: &Path| -> Result<(Option<SystemTime>, u64)> {
            let meta = fs::metadata(path)
                .with_context(|| format!("Failed to stat model file {:?}", path))?;
            Ok((meta.modified().ok(), meta.len()))
        };
        Ok([read(&self.coarse)?, read(&self.fine)?, read(&self.classify)?, read(&self.core)?])
    }
}

pub struct InferenceEngine {
    coarse_session: Session,
    fine_session: Session,
    classify_session: Session,
    core_session: Session,
}

impl InferenceEngine {
    pub fn new(files: &ModelFiles) -> Result<Self> {
        // Re-committing the global environment after the first load is harmless.
        let _ = ort::init()
            .with_name("minutiae-extractor")
            .commit();

        let load = |path: &Path, label: &str| -> Result<Session> {
            Session::builder()?
                .with_intra_threads(1)?
                .commit_from_file(path)
                .with_context(|| format!("Failed to load {} model from {:?}", label, path))
        };

        let engine = Self {
            coarse_session: load(&files.coarse, "coarse")?,
            fine_session: load(&files.fine, "fine")?,
            classify_session: load(&files.classify, "classification")?,
            core_session: load(&files.core, "orientation")?,
        };
        info!("Loaded minutiae detector models");
        Ok(engine)
    }

    pub fn coarse_session(&self) -> &Session {
        &self.coarse_session
    }

    pub fn fine_session(&self) -> &Session {
        &self.fine_session
    }

    pub fn classify_session(&self) -> &Session {
        &self.classify_session
    }

    pub fn core_session(&self) -> &Session {
        &self.core_session
    }
}
