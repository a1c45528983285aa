use sha2::{Sha256, Digest};
use tracing::{info, warn};

use crate::database::error::Result;
use crate::database::users::{NewUser, RoleLevel, UserRepository};

/// Unsalted SHA-256 over the UTF-8 bytes, hex encoded. Matches digests
/// already stored by earlier versions of the application.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create the well-known elevated account if it does not exist yet.
/// Returns `true` when an account was inserted.
pub fn bootstrap_admin(users: &UserRepository, username: &str, password: &str) -> Result<bool> {
    if users.get_by_username(username)?.is_some() {
        return Ok(false);
    }
    let mut admin = NewUser::new(username, password);
    admin.full_name = Some("Administrator".to_string());
    admin.role = RoleLevel::Elevated;
    users.register(&admin)?;
    info!("Bootstrapped account '{}'", username);
    Ok(true)
}

/// Force the well-known account back to the elevated role if it lost it.
/// Returns `true` when a repair was made.
pub fn repair_admin_role(users: &UserRepository, username: &str) -> Result<bool> {
    match users.get_by_username(username)? {
        Some(account) if !account.is_elevated() => {
            users.set_role(account.id, RoleLevel::Elevated)?;
            warn!("Account '{}' was not elevated, role restored", username);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Startup routine: both steps are idempotent.
pub fn ensure_admin(users: &UserRepository, username: &str, password: &str) -> Result<()> {
    bootstrap_admin(users, username, password)?;
    repair_admin_role(users, username)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::migrate::initialize;

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_password("123"),
            "a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3"
        );
        assert_eq!(hash_password("123"), hash_password("123"));
        assert_ne!(hash_password("123"), hash_password("124"));
    }

    #[test]
    fn test_bootstrap_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("auth.db");
        initialize(&db)?;
        let users = UserRepository::new(&db);

        assert!(bootstrap_admin(&users, "admin", "123")?);
        assert!(!bootstrap_admin(&users, "admin", "other")?);
        ensure_admin(&users, "admin", "123")?;

        assert_eq!(users.list_all()?.len(), 1);
        let id = users.check_credentials("admin", "123")?;
        assert!(users.get_by_id(id)?.is_elevated());
        Ok(())
    }

    #[test]
    fn test_repair_restores_elevated_role() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("auth.db");
        initialize(&db)?;
        let users = UserRepository::new(&db);

        // Simulates an account created by an older build with the default role.
        let id = users.register(&NewUser::new("admin", "123"))?;
        assert!(!bootstrap_admin(&users, "admin", "123")?);
        assert!(repair_admin_role(&users, "admin")?);
        assert!(users.get_by_id(id)?.is_elevated());
        assert!(!repair_admin_role(&users, "admin")?);

        assert!(!repair_admin_role(&users, "ghost")?);
        Ok(())
    }
}
