use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use anyhow::{Result, Context};
use tracing::{debug, warn};

/// Move an artifact file, creating the destination directory as needed.
/// Falls back to copy-and-remove when a plain rename crosses filesystems.
pub fn move_artifact(from: &Path, to: &Path) -> Result<PathBuf> {
    if !from.is_file() {
        return Err(anyhow::anyhow!("Source artifact {:?} does not exist", from));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    if fs::rename(from, to).is_err() {
        fs::copy(from, to).with_context(|| format!("Failed to copy {:?} to {:?}", from, to))?;
        if let Err(e) = fs::remove_file(from) {
            warn!("Copied {:?} but could not remove the original: {}", from, e);
        }
    }
    Ok(to.to_path_buf())
}

/// Best-effort delete. A file that is already gone counts as removed.
pub fn remove_artifact(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed artifact {:?}", path);
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Artifact {:?} already absent", path);
            true
        }
        Err(e) => {
            warn!("Failed to remove artifact {:?}: {}", path, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_creates_parent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let from = dir.path().join("x_mentah.png");
        fs::write(&from, b"raw")?;
        let to = dir.path().join("mentah").join("7_mentah.png");

        assert_eq!(move_artifact(&from, &to)?, to);
        assert!(!from.exists());
        assert_eq!(fs::read(&to)?, b"raw");
        Ok(())
    }

    #[test]
    fn test_move_missing_source_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let res = move_artifact(&dir.path().join("gone.png"), &dir.path().join("a/b.png"));
        assert!(res.is_err());
        assert!(!dir.path().join("a").exists());
        Ok(())
    }

    #[test]
    fn test_remove_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("r.png");
        fs::write(&path, b"x")?;

        assert!(remove_artifact(&path));
        assert!(remove_artifact(&path));
        assert!(!path.exists());
        Ok(())
    }
}
