use std::path::{Path, PathBuf};
use chrono::Local;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::info;

use crate::archive::artifacts::remove_artifact;
use crate::database::auth::hash_password;
use crate::database::error::{Result, StoreError};
use crate::database::{non_empty, open};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoleLevel {
    Standard,
    Elevated,
}

impl RoleLevel {
    pub fn as_i64(self) -> i64 {
        match self {
            RoleLevel::Standard => 0,
            RoleLevel::Elevated => 1,
        }
    }
}

impl TryFrom<i64> for RoleLevel {
    type Error = StoreError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(RoleLevel::Standard),
            1 => Ok(RoleLevel::Elevated),
            other => Err(StoreError::InvalidRole(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub nrp: Option<String>,
    pub role: RoleLevel,
    pub jabatan: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: Option<String>,
}

impl UserAccount {
    pub fn is_elevated(&self) -> bool {
        self.role == RoleLevel::Elevated
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
    pub nrp: Option<String>,
    pub jabatan: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: RoleLevel,
}

impl NewUser {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            full_name: None,
            nrp: None,
            jabatan: None,
            phone: None,
            email: None,
            role: RoleLevel::Standard,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub nrp: Option<String>,
    pub jabatan: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: RoleLevel,
}

impl From<&UserAccount> for ProfileUpdate {
    fn from(user: &UserAccount) -> Self {
        Self {
            full_name: user.full_name.clone(),
            nrp: user.nrp.clone(),
            jabatan: user.jabatan.clone(),
            phone: user.phone.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

const SELECT_USER: &str = "
    SELECT id, username, password_hash, full_name, nrp, level,
           jabatan, nomor_hp, email, created_at
    FROM users
";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
    let level: i64 = row.get(5)?;
    // Legacy rows may hold other values; only 1 is elevated.
    let role = if level == 1 { RoleLevel::Elevated } else { RoleLevel::Standard };
    Ok(UserAccount {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        nrp: row.get(4)?,
        role,
        jabatan: row.get(6)?,
        phone: row.get(7)?,
        email: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    db_path: PathBuf,
}

impl UserRepository {
    pub fn new(db_path: &Path) -> Self {
        Self { db_path: db_path.to_path_buf() }
    }

    fn conn(&self) -> Result<Connection> {
        open(&self.db_path)
    }

    pub fn register(&self, user: &NewUser) -> Result<i64> {
        let username = user.username.trim();
        if username.is_empty() {
            return Err(StoreError::InvalidInput("username is required".into()));
        }
        if user.password.is_empty() {
            return Err(StoreError::InvalidInput("password is required".into()));
        }

        let conn = self.conn()?;
        let created_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let level = user.role.as_i64();
        let inserted = conn.execute(
            "INSERT INTO users (username, password_hash, full_name, nrp, jabatan,
                                nomor_hp, email, is_admin, level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                username,
                hash_password(&user.password),
                non_empty(user.full_name.as_deref()),
                non_empty(user.nrp.as_deref()),
                non_empty(user.jabatan.as_deref()),
                non_empty(user.phone.as_deref()),
                non_empty(user.email.as_deref()),
                level,
                level,
                created_at,
            ],
        );

        match inserted {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                info!("Registered user '{}' ({})", username, id);
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateUsername(username.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the account id when the password matches the stored digest.
    pub fn check_credentials(&self, username: &str, password: &str) -> Result<i64> {
        let user = self.get_by_username(username)?.ok_or(StoreError::InvalidCredentials)?;
        if user.password_hash == hash_password(password) {
            Ok(user.id)
        } else {
            Err(StoreError::InvalidCredentials)
        }
    }

    pub fn get_by_id(&self, id: i64) -> Result<UserAccount> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE id = ?1", SELECT_USER);
        conn.query_row(&sql, params![id], user_from_row)
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE username = ?1", SELECT_USER);
        Ok(conn.query_row(&sql, params![username.trim()], user_from_row).optional()?)
    }

    pub fn list_all(&self) -> Result<Vec<UserAccount>> {
        let conn = self.conn()?;
        let sql = format!("{} ORDER BY id", SELECT_USER);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], user_from_row)?;
        let users = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn update_profile(&self, id: i64, update: &ProfileUpdate) -> Result<()> {
        let conn = self.conn()?;
        let level = update.role.as_i64();
        let changed = conn.execute(
            "UPDATE users
             SET full_name = ?1, nrp = ?2, jabatan = ?3, nomor_hp = ?4, email = ?5,
                 is_admin = ?6, level = ?7
             WHERE id = ?8",
            params![
                non_empty(update.full_name.as_deref()),
                non_empty(update.nrp.as_deref()),
                non_empty(update.jabatan.as_deref()),
                non_empty(update.phone.as_deref()),
                non_empty(update.email.as_deref()),
                level,
                level,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub fn set_role(&self, id: i64, role: RoleLevel) -> Result<()> {
        let conn = self.conn()?;
        let level = role.as_i64();
        let changed = conn.execute(
            "UPDATE users SET is_admin = ?1, level = ?2 WHERE id = ?3",
            params![level, level, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub fn set_password(&self, id: i64, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(StoreError::InvalidInput("password is required".into()));
        }
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![hash_password(password), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Delete an account together with every case it owns. Artifact files are
    /// removed after the transaction commits, best-effort.
    pub fn delete_cascade(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM users WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(false);
        }

        let artifacts: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT path_mentah, path_ekstraksi FROM history WHERE user_id = ?1")?;
            let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let cases = tx.execute("DELETE FROM history WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;

        for (raw, result) in &artifacts {
            remove_artifact(Path::new(raw));
            remove_artifact(Path::new(result));
        }
        info!("Deleted user {} and {} owned case(s)", id, cases);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::database::migrate::initialize;
    use crate::database::repo::{CaseRepository, NewCase};

    fn repo() -> anyhow::Result<(tempfile::TempDir, UserRepository)> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("users.db");
        initialize(&db)?;
        Ok((dir, UserRepository::new(&db)))
    }

    #[test]
    fn test_register_and_login() -> anyhow::Result<()> {
        let (_dir, users) = repo()?;
        let id = users.register(&NewUser::new("budi", "s3cret"))?;

        assert_eq!(users.check_credentials("budi", "s3cret")?, id);
        assert!(matches!(users.check_credentials("budi", "wrong"), Err(StoreError::InvalidCredentials)));
        assert!(matches!(users.check_credentials("nobody", "s3cret"), Err(StoreError::InvalidCredentials)));

        let account = users.get_by_id(id)?;
        assert_eq!(account.role, RoleLevel::Standard);
        assert!(account.created_at.is_some());
        assert_ne!(account.password_hash, "s3cret");
        Ok(())
    }

    #[test]
    fn test_duplicate_username_rejected() -> anyhow::Result<()> {
        let (_dir, users) = repo()?;
        users.register(&NewUser::new("sari", "a"))?;
        let err = users.register(&NewUser::new("sari", "b")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername(name) if name == "sari"));
        Ok(())
    }

    #[test]
    fn test_update_profile_and_role() -> anyhow::Result<()> {
        let (_dir, users) = repo()?;
        let id = users.register(&NewUser::new("andi", "pw"))?;

        users.update_profile(id, &ProfileUpdate {
            full_name: Some("Andi Wijaya".into()),
            nrp: Some("87050123".into()),
            jabatan: Some("Penyidik".into()),
            phone: Some("0812".into()),
            email: Some("  ".into()),
            role: RoleLevel::Elevated,
        })?;

        let account = users.get_by_id(id)?;
        assert_eq!(account.full_name.as_deref(), Some("Andi Wijaya"));
        assert_eq!(account.email, None);
        assert!(account.is_elevated());

        users.set_role(id, RoleLevel::Standard)?;
        assert!(!users.get_by_id(id)?.is_elevated());
        assert!(matches!(users.set_role(999, RoleLevel::Standard), Err(StoreError::NotFound(999))));
        Ok(())
    }

    #[test]
    fn test_set_password() -> anyhow::Result<()> {
        let (_dir, users) = repo()?;
        let id = users.register(&NewUser::new("dewi", "old"))?;
        users.set_password(id, "new")?;

        assert!(users.check_credentials("dewi", "old").is_err());
        assert_eq!(users.check_credentials("dewi", "new")?, id);
        Ok(())
    }

    #[test]
    fn test_role_level_bounds() {
        assert_eq!(RoleLevel::try_from(0).ok(), Some(RoleLevel::Standard));
        assert_eq!(RoleLevel::try_from(1).ok(), Some(RoleLevel::Elevated));
        assert!(matches!(RoleLevel::try_from(2), Err(StoreError::InvalidRole(2))));
    }

    #[test]
    fn test_delete_cascades_cases_and_artifacts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("cascade.db");
        initialize(&db)?;
        let users = UserRepository::new(&db);
        let cases = CaseRepository::new(&db, dir.path());

        let doomed = users.register(&NewUser::new("pergi", "pw"))?;
        let keeper = users.register(&NewUser::new("tetap", "pw"))?;

        let mut stored = Vec::new();
        for (owner, name) in [(doomed, "a"), (doomed, "b"), (keeper, "c")] {
            let raw = dir.path().join(format!("{}_mentah.png", name));
            let result = dir.path().join(format!("{}_ekstraksi.png", name));
            fs::write(&raw, b"r")?;
            fs::write(&result, b"e")?;
            let id = cases.create(&NewCase {
                title: name.to_string(),
                report_number: None,
                incident_date: None,
                raw_path: raw.clone(),
                result_path: result.clone(),
                owner_id: owner,
                minutiae_count: 0,
            })?;
            stored.push((id, raw, result));
        }
        // One artifact of the doomed user is already gone.
        fs::remove_file(&stored[1].2)?;

        assert!(users.delete_cascade(doomed)?);
        assert!(matches!(users.get_by_id(doomed), Err(StoreError::NotFound(_))));
        assert_eq!(cases.count(None)?, 1);
        assert!(!stored[0].1.exists() && !stored[0].2.exists());
        assert!(!stored[1].1.exists());
        assert!(stored[2].1.exists());

        assert!(!users.delete_cascade(doomed)?);
        Ok(())
    }
}
