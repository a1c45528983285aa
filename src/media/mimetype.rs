use std::path::Path;
use anyhow::{Result, Context, anyhow};
use infer;

pub fn detect_mimetype(path: &Path) -> Result<String> {
    let kind = infer::get_from_path(path)
        .with_context(|| format!("Failed to read {:?} for mimetype detection", path))?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok("application/octet-stream".to_string()),
    }
}

/// Reject uploads that are not recognisably an image before decoding them.
pub fn ensure_image(path: &Path) -> Result<String> {
    let mime = detect_mimetype(path)?;
    if mime.starts_with("image/") {
        Ok(mime)
    } else {
        Err(anyhow!("{:?} is not an image (detected {})", path, mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::fs;

    #[test]
    fn test_png_is_accepted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("print.png");
        GrayImage::from_pixel(8, 8, Luma([200])).save(&path)?;

        assert_eq!(ensure_image(&path)?, "image/png");
        Ok(())
    }

    #[test]
    fn test_text_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notes.png");
        fs::write(&path, b"definitely not pixels")?;

        assert!(ensure_image(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(ensure_image(Path::new("does/not/exist.png")).is_err());
    }
}
