use std::path::{Path, PathBuf};
use chrono::{DateTime, Local};

const MAX_TITLE_TOKEN: usize = 30;

pub const RAW_SUFFIX: &str = "mentah";
pub const RESULT_SUFFIX: &str = "ekstraksi";
pub const ARTIFACT_EXT: &str = "png";

/// Reduce a free-form case title to a token that is safe inside a file name.
///
/// Only ASCII letters, digits, spaces and underscores survive. The result is
/// trimmed, cut to 30 characters, and spaces become underscores.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '_')
        .collect();

    kept.trim()
        .chars()
        .take(MAX_TITLE_TOKEN)
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

/// Timestamped stem shared by both staging artifacts of a run.
pub fn staging_base_name(title: &str, now: DateTime<Local>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let token = sanitize_title(title);
    if token.is_empty() {
        stamp.to_string()
    } else {
        format!("{}_{}", stamp, token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub raw: PathBuf,
    pub result: PathBuf,
}

impl StagingPaths {
    pub fn new(staging_dir: &Path, base: &str) -> Self {
        Self {
            raw: staging_dir.join(format!("{}_{}.{}", base, RAW_SUFFIX, ARTIFACT_EXT)),
            result: staging_dir.join(format!("{}_{}.{}", base, RESULT_SUFFIX, ARTIFACT_EXT)),
        }
    }
}

/// Canonical location of an artifact once it belongs to a stored case:
/// `<data_root>/<kind>/<id>_<kind>.<ext>`.
pub fn canonical_path(data_root: &Path, kind: &str, case_id: i64, ext: &str) -> PathBuf {
    data_root.join(kind).join(format!("{}_{}.{}", case_id, kind, ext))
}
