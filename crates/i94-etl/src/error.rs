//! Error types for the I94 pipeline

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

/// Every failure a stage can raise. All of them are fatal to a run.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Cannot read {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Format error in {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    #[error("Cannot decode {column} value {value:?} as {target}")]
    Decode {
        column: &'static str,
        value: String,
        target: &'static str,
    },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EtlError {
    pub fn file_access(path: &Path, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn format(path: &Path, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn decode(column: &'static str, value: &str, target: &'static str) -> Self {
        Self::Decode {
            column,
            value: value.to_string(),
            target,
        }
    }

    /// DDL failures are reported as schema errors regardless of their driver cause
    pub fn schema(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self::Schema(db.message().to_string()),
            other => other.into(),
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                let constraint = db.constraint().unwrap_or("primary key").to_string();
                Self::Constraint(format!("{} ({})", db.message(), constraint))
            },
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connection(e.to_string()),
            sqlx::Error::Configuration(e) => Self::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Connection("connection unavailable".to_string())
            },
            other => Self::Database(other.to_string()),
        }
    }
}
