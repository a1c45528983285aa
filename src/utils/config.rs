use std::fs::{self, File};
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;
use anyhow::{Result, Context, anyhow};
use tracing::{info, warn};

use crate::media::preprocess::PreprocessConfig;
use crate::media::render::{DOT, ORIENTED, RenderOptions};
use crate::ml::engine::COARSE_NET;

const SEARCH_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// File the settings came from; discovered values are written back here.
    pub source: PathBuf,
    pub data_root: PathBuf,
    pub db_path: PathBuf,
    pub model_dir: PathBuf,
    pub preprocess: PreprocessConfig,
    pub render: RenderOptions,
    /// Ranked renderer names, first available wins.
    pub renderers: Vec<String>,
    pub bootstrap_username: String,
    pub bootstrap_password: String,
}

impl AppConfig {
    pub fn defaults(source: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            data_root: PathBuf::from("data_kasus"),
            db_path: PathBuf::from("minutiae_app.db"),
            model_dir: PathBuf::from("models"),
            preprocess: PreprocessConfig::default(),
            render: RenderOptions::default(),
            renderers: vec![ORIENTED.to_string(), DOT.to_string()],
            bootstrap_username: "admin".to_string(),
            bootstrap_password: "123".to_string(),
        }
    }

    /// Read `KEY=VALUE` settings from `path`. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::defaults(path);
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(config);
        }

        for (key, value) in read_pairs(path)? {
            let value = value.as_str();
            match key.as_str() {
                "DATA_ROOT" => config.data_root = PathBuf::from(value),
                "DB_PATH" => config.db_path = PathBuf::from(value),
                "MODEL_DIR" => config.model_dir = PathBuf::from(value),
                "TARGET_LONG_SIDE" => config.preprocess.target_long_side = parse(&key, value)?,
                "CLAHE_CLIP_LIMIT" => config.preprocess.clip_limit = parse(&key, value)?,
                "CLAHE_TILE_GRID" => config.preprocess.tile_grid = parse(&key, value)?,
                "DENOISE_STRENGTH" => config.preprocess.denoise_strength = parse(&key, value)?,
                "SHARPEN_AMOUNT" => config.preprocess.sharpen_amount = parse(&key, value)?,
                "MARKER_RADIUS" => config.render.marker_radius = parse(&key, value)?,
                "RENDERERS" => {
                    config.renderers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                "BOOTSTRAP_USERNAME" => config.bootstrap_username = value.to_string(),
                "BOOTSTRAP_PASSWORD" => config.bootstrap_password = value.to_string(),
                other => warn!("Ignoring unknown config key '{}'", other),
            }
        }
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Make sure `model_dir` points at the detector weights. When the
    /// configured directory lacks them, search nearby directories and
    /// remember a hit in the config file. A miss is not an error here.
    pub fn resolve_model_dir(&mut self) -> Result<&Path> {
        if self.model_dir.join(COARSE_NET).is_file() {
            return Ok(self.model_dir.as_path());
        }

        info!("{} not found in {:?}. Searching filesystem...", COARSE_NET, self.model_dir);
        let root = std::env::current_dir()?;
        match find_file(&root, COARSE_NET, SEARCH_DEPTH) {
            Ok(found) => {
                if let Some(dir) = found.parent() {
                    self.model_dir = dir.to_path_buf();
                    save_key(&self.source, "MODEL_DIR", &self.model_dir.display().to_string())?;
                    info!("Found models in {:?}, saved to {:?}", self.model_dir, self.source);
                }
            }
            Err(e) => warn!("{}", e),
        }
        Ok(self.model_dir.as_path())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", value, key, e))
}

fn read_pairs(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
    let reader = BufReader::new(file);

    let mut pairs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(pairs)
}

/// Set one key in the config file, keeping every other line as it was.
fn save_key(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?
    } else {
        String::new()
    };

    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| match line.split_once('=') {
            Some((k, _)) if k.trim() == key => {
                replaced = true;
                format!("{}={}", key, value)
            }
            _ => line.to_string(),
        })
        .collect();
    if !replaced {
        lines.push(format!("{}={}", key, value));
    }

    let mut file = File::create(path).context("Failed to create config file")?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

fn find_file(root: &Path, filename: &str, max_depth: usize) -> Result<PathBuf> {
    let search = |dir: &Path| {
        WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == filename)
            .map(|e| e.path().to_path_buf())
    };

    if let Some(found) = search(root) {
        return Ok(found);
    }
    // Running from a subdirectory of the project is common.
    if let Some(found) = root.parent().and_then(search) {
        return Ok(found);
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}
