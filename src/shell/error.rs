use thiserror::Error;

use crate::database::error::StoreError;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("An extraction is already running")]
    RunInFlight,

    #[error("{0}")]
    Validation(String),

    #[error("Account '{0}' is not allowed to do that")]
    NotAuthorized(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Could not start extraction worker: {0}")]
    Worker(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;
