use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record {0} not found")]
    NotFound(i64),

    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),

    #[error("Owner account {0} does not exist")]
    UnknownOwner(i64),

    #[error("Artifact missing on disk: {0}")]
    MissingArtifact(String),

    #[error("Invalid role level {0}, expected 0 or 1")]
    InvalidRole(i64),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
