//! Error types for codex-title-core

use thiserror::Error;

/// Main error type for the codex-title-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Version control query failed (not a repository, git missing, ...)
    #[error("version control error: {0}")]
    Vcs(String),

    /// Logging could not be initialized
    #[error("logging error: {0}")]
    Logging(String),
}

/// Result type alias for codex-title-core
pub type Result<T> = std::result::Result<T, Error>;
