//! Error types for fragstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using FragError
pub type Result<T> = std::result::Result<T, FragError>;

/// Errors produced while decoding a record buffer.
///
/// Either one means corruption or a programming bug; neither occurs in
/// normal operation except for a torn tail left by a crash mid-append.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("bad record magic: expected 0xF96E, found {found:#06x}")]
    BadMagic { found: u16 },

    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

/// Unified error type for fragstore operations
#[derive(Debug, Error)]
pub enum FragError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Record format error: {0}")]
    Format(#[from] FormatError),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Data directory is locked by another process: {0}")]
    Locked(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for FragError {
    fn from(e: bincode::Error) -> Self {
        FragError::Serialization(e.to_string())
    }
}

impl FragError {
    /// True when the error is an I/O `NotFound`, e.g. a segment file that was
    /// retired between an index lookup and the read.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, FragError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
