use tracing::{info, warn};

use crate::database::error::StoreError;
use crate::database::repo::{CaseRecord, CaseRepository};
use crate::database::users::{UserAccount, UserRepository};
use crate::shell::error::{Result, ShellError};

/// The signed-in account for the lifetime of one shell invocation.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserAccount,
}

impl Session {
    pub fn login(users: &UserRepository, username: &str, password: &str) -> Result<Self> {
        let id = match users.check_credentials(username, password) {
            Ok(id) => id,
            Err(StoreError::InvalidCredentials) => {
                warn!("Rejected login for '{}'", username);
                return Err(ShellError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };
        let user = users.get_by_id(id)?;
        info!("Signed in as '{}'", user.username);
        Ok(Self { user })
    }

    pub fn user_id(&self) -> i64 {
        self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_elevated()
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ShellError::NotAuthorized(self.user.username.clone()))
        }
    }

    /// Owner filter for listings: elevated accounts see every case.
    pub fn case_scope(&self) -> Option<i64> {
        if self.is_admin() { None } else { Some(self.user.id) }
    }

    /// Load a case the signed-in account may act on.
    pub fn case(&self, cases: &CaseRepository, id: i64) -> Result<CaseRecord> {
        let record = cases.get_by_id(id)?;
        if self.is_admin() || record.owner_user_id == self.user.id {
            Ok(record)
        } else {
            Err(ShellError::NotAuthorized(self.user.username.clone()))
        }
    }

    /// Accounts may manage themselves; elevated accounts may manage anyone.
    pub fn require_self_or_admin(&self, user_id: i64) -> Result<()> {
        if self.user.id == user_id {
            Ok(())
        } else {
            self.require_admin()
        }
    }
}
