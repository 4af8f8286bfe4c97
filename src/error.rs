//! Unified error type for the vibeMCP core — a closed set of kinds at the
//! component boundary, regardless of which layer raised them.

use thiserror::Error;

/// The ten error kinds named by the specification. Transport layers map these
/// to whatever wire representation they use (HTTP status, JSON-RPC code, …);
/// the core itself never picks a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    InvalidPath,
    Unsafe,
    LimitExceeded,
    PermissionDenied,
    Conflict,
    Corrupt,
    Transient,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unsafe: {0}")]
    Unsafe(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("index corrupt: {0}")]
    Corrupt(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// The closed error kind this error maps to at the component boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::Unsafe(_) => ErrorKind::Unsafe,
            Self::LimitExceeded(_) => ErrorKind::LimitExceeded,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::Transient(_) => ErrorKind::Transient,
            // sqlx::Error::Database with a "database is locked" code is the
            // one retryable case we see in practice; everything else from the
            // store surfaces as a plain internal/transient failure.
            Self::Database(e) if is_locked(e) => ErrorKind::Transient,
            Self::Database(_) | Self::Migration(_) | Self::Io(_) => ErrorKind::Transient,
        }
    }

    /// (kind, human message) pair — the structured error record callers see.
    pub fn into_detail(self) -> (ErrorKind, String) {
        let kind = self.kind();
        (kind, self.to_string())
    }
}

fn is_locked(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("locked"))
}
