use std::path::{Path, PathBuf};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::artifacts::{move_artifact, remove_artifact};
use crate::database::error::{Result, StoreError};
use crate::database::{non_empty, open};
use crate::extraction::error::PipelineError;
use crate::ingest::naming::{canonical_path, ARTIFACT_EXT, RAW_SUFFIX, RESULT_SUFFIX};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRecord {
    pub id: i64,
    pub title: String,
    pub report_number: Option<String>,
    pub incident_date: Option<String>,
    pub raw_artifact_path: String,
    pub result_artifact_path: String,
    pub minutiae_count: Option<i64>,
    pub owner_user_id: i64,
    pub owner_username: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewCase {
    pub title: String,
    pub report_number: Option<String>,
    pub incident_date: Option<String>,
    pub raw_path: PathBuf,
    pub result_path: PathBuf,
    pub owner_id: i64,
    pub minutiae_count: usize,
}

/// The editable subset of a case.
#[derive(Debug, Clone, Default)]
pub struct CaseUpdate {
    pub title: String,
    pub report_number: Option<String>,
    pub incident_date: Option<String>,
}

const SELECT_CASE: &str = "
    SELECT h.id, h.judul_kasus, h.nomor_lp, h.tanggal_kejadian,
           h.path_mentah, h.path_ekstraksi, h.minutiae_count,
           h.user_id, u.username, h.timestamp
    FROM history h
    LEFT JOIN users u ON h.user_id = u.id
";

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<CaseRecord> {
    Ok(CaseRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        report_number: row.get(2)?,
        incident_date: row.get(3)?,
        raw_artifact_path: row.get(4)?,
        result_artifact_path: row.get(5)?,
        minutiae_count: row.get(6)?,
        owner_user_id: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
        owner_username: row.get(8)?,
        created_at: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

/// Stores cases and owns the canonical artifact tree under `data_root`.
#[derive(Debug, Clone)]
pub struct CaseRepository {
    db_path: PathBuf,
    data_root: PathBuf,
}

impl CaseRepository {
    pub fn new(db_path: &Path, data_root: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            data_root: data_root.to_path_buf(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    fn conn(&self) -> Result<Connection> {
        open(&self.db_path)
    }

    pub fn create(&self, case: &NewCase) -> Result<i64> {
        let title = case.title.trim();
        if title.is_empty() {
            return Err(StoreError::InvalidInput("case title is required".into()));
        }
        for path in [&case.raw_path, &case.result_path] {
            if path.as_os_str().is_empty() || !path.is_file() {
                return Err(StoreError::MissingArtifact(path.display().to_string()));
            }
        }

        let conn = self.conn()?;
        let owner: Option<i64> = conn
            .query_row("SELECT id FROM users WHERE id = ?1", params![case.owner_id], |row| row.get(0))
            .optional()?;
        if owner.is_none() {
            return Err(StoreError::UnknownOwner(case.owner_id));
        }

        conn.execute(
            "INSERT INTO history (judul_kasus, nomor_lp, tanggal_kejadian, path_mentah,
                                  path_ekstraksi, user_id, minutiae_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                title,
                non_empty(case.report_number.as_deref()),
                non_empty(case.incident_date.as_deref()),
                case.raw_path.to_string_lossy(),
                case.result_path.to_string_lossy(),
                case.owner_id,
                case.minutiae_count as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Stored case {} ({} minutiae)", id, case.minutiae_count);
        Ok(id)
    }

    pub fn get_by_id(&self, id: i64) -> Result<CaseRecord> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE h.id = ?1", SELECT_CASE);
        conn.query_row(&sql, params![id], case_from_row)
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    /// Newest first. `None` lists every owner's cases.
    pub fn list_by_owner(&self, owner: Option<i64>) -> Result<Vec<CaseRecord>> {
        let conn = self.conn()?;
        let order = "ORDER BY h.timestamp DESC, h.id DESC";
        let records = match owner {
            Some(owner_id) => {
                let sql = format!("{} WHERE h.user_id = ?1 {}", SELECT_CASE, order);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![owner_id], case_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("{} {}", SELECT_CASE, order);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], case_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    pub fn count(&self, owner: Option<i64>) -> Result<i64> {
        let conn = self.conn()?;
        let total: i64 = match owner {
            Some(owner_id) => conn.query_row(
                "SELECT COUNT(id) FROM history WHERE user_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(id) FROM history", [], |row| row.get(0))?,
        };
        Ok(total)
    }

    /// Metadata-only edit; artifact paths are never touched here.
    pub fn update(&self, id: i64, update: &CaseUpdate) -> Result<()> {
        let title = update.title.trim();
        if title.is_empty() {
            return Err(StoreError::InvalidInput("case title is required".into()));
        }
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE history SET judul_kasus = ?1, nomor_lp = ?2, tanggal_kejadian = ?3 WHERE id = ?4",
            params![
                title,
                non_empty(update.report_number.as_deref()),
                non_empty(update.incident_date.as_deref()),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Remove the row, then both artifact files. Returns `false` when no such
    /// case existed. Files that are already gone are not an error.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let paths: Option<(String, String)> = conn
            .query_row(
                "SELECT path_mentah, path_ekstraksi FROM history WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((raw, result)) = paths else {
            return Ok(false);
        };

        conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        drop(conn);

        remove_artifact(Path::new(&raw));
        remove_artifact(Path::new(&result));
        info!("Deleted case {}", id);
        Ok(true)
    }

    /// Move staged artifacts into `<data_root>/mentah/<id>_mentah.<ext>` and
    /// `<data_root>/ekstraksi/<id>_ekstraksi.<ext>`.
    ///
    /// Each file moves independently and only successful moves update the
    /// stored path. Failures are logged and never propagated; the returned
    /// pair is where each artifact now lives.
    pub fn relocate(&self, id: i64, staging_raw: &Path, staging_result: &Path) -> (PathBuf, PathBuf) {
        let moved_raw = self.relocate_one(id, staging_raw, RAW_SUFFIX);
        let moved_result = self.relocate_one(id, staging_result, RESULT_SUFFIX);

        if moved_raw.is_none() && moved_result.is_none() {
            return (staging_raw.to_path_buf(), staging_result.to_path_buf());
        }

        if let Err(e) = self.store_paths(id, moved_raw.as_deref(), moved_result.as_deref()) {
            let err = PipelineError::RelocationFailed(format!("case {}: {}", id, e));
            error!("{}; moving artifacts back to staging", err);
            if let Some(raw) = &moved_raw {
                restore(raw, staging_raw);
            }
            if let Some(result) = &moved_result {
                restore(result, staging_result);
            }
            return (staging_raw.to_path_buf(), staging_result.to_path_buf());
        }

        (
            moved_raw.unwrap_or_else(|| staging_raw.to_path_buf()),
            moved_result.unwrap_or_else(|| staging_result.to_path_buf()),
        )
    }

    fn relocate_one(&self, id: i64, staging: &Path, kind: &str) -> Option<PathBuf> {
        let ext = staging
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(ARTIFACT_EXT);
        let target = canonical_path(&self.data_root, kind, id, ext);
        if staging == target {
            return Some(target);
        }

        match move_artifact(staging, &target) {
            Ok(path) => Some(path),
            Err(e) => {
                let err = PipelineError::RelocationFailed(format!("{:?}: {:#}", staging, e));
                warn!("{}", err);
                None
            }
        }
    }

    fn store_paths(&self, id: i64, raw: Option<&Path>, result: Option<&Path>) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE history
             SET path_mentah = COALESCE(?1, path_mentah),
                 path_ekstraksi = COALESCE(?2, path_ekstraksi)
             WHERE id = ?3",
            params![
                raw.map(|p| p.to_string_lossy().into_owned()),
                result.map(|p| p.to_string_lossy().into_owned()),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

fn restore(moved: &Path, original: &Path) {
    if let Err(e) = move_artifact(moved, original) {
        warn!("Could not move {:?} back to {:?}: {:#}", moved, original, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::database::migrate::initialize;
    use crate::database::users::{NewUser, UserRepository};

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        cases: CaseRepository,
        owner: i64,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("cases.db");
        let root = dir.path().join("data");
        fs::create_dir_all(&root)?;
        initialize(&db)?;
        let owner = UserRepository::new(&db).register(&NewUser::new("penyidik", "rahasia"))?;
        Ok(Fixture {
            cases: CaseRepository::new(&db, &root),
            root,
            owner,
            _dir: dir,
        })
    }

    fn stage(root: &Path, name: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
        let raw = root.join(format!("{}_mentah.png", name));
        let result = root.join(format!("{}_ekstraksi.png", name));
        fs::write(&raw, b"raw")?;
        fs::write(&result, b"result")?;
        Ok((raw, result))
    }

    fn new_case(title: &str, owner: i64, raw: &Path, result: &Path) -> NewCase {
        NewCase {
            title: title.to_string(),
            report_number: Some("LP/123/IX/2023".to_string()),
            incident_date: Some("2023-09-01".to_string()),
            raw_path: raw.to_path_buf(),
            result_path: result.to_path_buf(),
            owner_id: owner,
            minutiae_count: 17,
        }
    }

    #[test]
    fn test_create_and_get() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "a")?;
        let id = fx.cases.create(&new_case("Kasus ATM", fx.owner, &raw, &result))?;

        let record = fx.cases.get_by_id(id)?;
        assert_eq!(record.title, "Kasus ATM");
        assert_eq!(record.report_number.as_deref(), Some("LP/123/IX/2023"));
        assert_eq!(record.minutiae_count, Some(17));
        assert_eq!(record.owner_user_id, fx.owner);
        assert_eq!(record.owner_username.as_deref(), Some("penyidik"));
        assert!(!record.created_at.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_requires_artifacts_and_owner() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "b")?;

        let missing = fx.root.join("nope.png");
        let err = fx.cases.create(&new_case("X", fx.owner, &raw, &missing)).unwrap_err();
        assert!(matches!(err, StoreError::MissingArtifact(_)));

        let err = fx.cases.create(&new_case("X", fx.owner + 99, &raw, &result)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownOwner(_)));

        assert_eq!(fx.cases.count(None)?, 0);
        Ok(())
    }

    #[test]
    fn test_get_missing_is_not_found() -> anyhow::Result<()> {
        let fx = fixture()?;
        assert!(matches!(fx.cases.get_by_id(404), Err(StoreError::NotFound(404))));
        Ok(())
    }

    #[test]
    fn test_list_newest_first_and_by_owner() -> anyhow::Result<()> {
        let fx = fixture()?;
        let other = UserRepository::new(&fx.cases.db_path).register(&NewUser::new("lain", "pw"))?;

        let (r1, e1) = stage(&fx.root, "one")?;
        let (r2, e2) = stage(&fx.root, "two")?;
        let (r3, e3) = stage(&fx.root, "three")?;
        let first = fx.cases.create(&new_case("one", fx.owner, &r1, &e1))?;
        let second = fx.cases.create(&new_case("two", other, &r2, &e2))?;
        let third = fx.cases.create(&new_case("three", fx.owner, &r3, &e3))?;

        let all: Vec<i64> = fx.cases.list_by_owner(None)?.iter().map(|c| c.id).collect();
        assert_eq!(all, vec![third, second, first]);

        let mine: Vec<i64> = fx.cases.list_by_owner(Some(fx.owner))?.iter().map(|c| c.id).collect();
        assert_eq!(mine, vec![third, first]);

        assert_eq!(fx.cases.count(Some(other))?, 1);
        assert_eq!(fx.cases.count(None)?, 3);
        Ok(())
    }

    #[test]
    fn test_update_touches_metadata_only() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "c")?;
        let id = fx.cases.create(&new_case("Lama", fx.owner, &raw, &result))?;

        fx.cases.update(id, &CaseUpdate {
            title: "Baru".to_string(),
            report_number: Some("".to_string()),
            incident_date: Some("2024-01-02".to_string()),
        })?;

        let record = fx.cases.get_by_id(id)?;
        assert_eq!(record.title, "Baru");
        assert_eq!(record.report_number, None);
        assert_eq!(record.incident_date.as_deref(), Some("2024-01-02"));
        assert_eq!(record.raw_artifact_path, raw.to_string_lossy());

        assert!(matches!(
            fx.cases.update(999, &CaseUpdate { title: "t".into(), ..Default::default() }),
            Err(StoreError::NotFound(999))
        ));
        Ok(())
    }

    #[test]
    fn test_delete_tolerates_missing_files() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "d")?;
        let id = fx.cases.create(&new_case("Hapus", fx.owner, &raw, &result))?;

        fs::remove_file(&raw)?;
        fs::remove_file(&result)?;

        assert!(fx.cases.delete(id)?);
        assert!(matches!(fx.cases.get_by_id(id), Err(StoreError::NotFound(_))));
        assert!(!fx.cases.delete(id)?);
        Ok(())
    }

    #[test]
    fn test_delete_removes_files() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "e")?;
        let id = fx.cases.create(&new_case("Hapus", fx.owner, &raw, &result))?;
        fs::remove_file(&result)?;

        assert!(fx.cases.delete(id)?);
        assert!(!raw.exists());
        Ok(())
    }

    #[test]
    fn test_relocate_moves_both() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "x")?;
        let id = fx.cases.create(&new_case("Pindah", fx.owner, &raw, &result))?;

        let (final_raw, final_result) = fx.cases.relocate(id, &raw, &result);
        assert_eq!(final_raw, fx.root.join("mentah").join(format!("{}_mentah.png", id)));
        assert_eq!(final_result, fx.root.join("ekstraksi").join(format!("{}_ekstraksi.png", id)));
        assert!(final_raw.is_file() && final_result.is_file());
        assert!(!raw.exists() && !result.exists());

        let record = fx.cases.get_by_id(id)?;
        assert_eq!(record.raw_artifact_path, final_raw.to_string_lossy());
        assert_eq!(record.result_artifact_path, final_result.to_string_lossy());
        Ok(())
    }

    #[test]
    fn test_relocate_keeps_path_of_failed_move() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "y")?;
        let id = fx.cases.create(&new_case("Sebagian", fx.owner, &raw, &result))?;

        // The result artifact vanishes before relocation, so only the raw move succeeds.
        fs::remove_file(&result)?;
        let (final_raw, final_result) = fx.cases.relocate(id, &raw, &result);

        assert_eq!(final_raw, fx.root.join("mentah").join(format!("{}_mentah.png", id)));
        assert_eq!(final_result, result);

        let record = fx.cases.get_by_id(id)?;
        assert_eq!(record.raw_artifact_path, final_raw.to_string_lossy());
        assert_eq!(record.result_artifact_path, result.to_string_lossy());
        Ok(())
    }

    #[test]
    fn test_relocate_unknown_case_restores_files() -> anyhow::Result<()> {
        let fx = fixture()?;
        let (raw, result) = stage(&fx.root, "z")?;

        let (final_raw, final_result) = fx.cases.relocate(42, &raw, &result);
        assert_eq!((final_raw, final_result), (raw.clone(), result.clone()));
        assert!(raw.is_file() && result.is_file());
        Ok(())
    }
}
