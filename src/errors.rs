// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed errors raised at component boundaries.
//!
//! Command runners wrap these in `anyhow` with context; the library keeps them
//! typed so callers can tell a corrupt file from a failed query.

use std::path::PathBuf;
use thiserror::Error;

/// File-level failure while reading a drawing. Fatal for that file only.
#[derive(Debug, Error)]
pub enum DrawingError {
    #[error("failed to read drawing {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt drawing {path:?} near line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Failure extracting a single entity. Never escapes the parser.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("{kind} is missing group code {code}")]
    MissingField { kind: &'static str, code: i32 },
    #[error("{kind} group code {code} has invalid value {value:?}")]
    InvalidValue {
        kind: &'static str,
        code: i32,
        value: String,
    },
}

/// A stored vector does not have the query's dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Errors surfaced by a similarity search request.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("limit must be between {min} and {max} (got {got})")]
    InvalidLimit { got: usize, min: usize, max: usize },
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("embedding service failed: {0:#}")]
    EmbeddingService(anyhow::Error),
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),
}

/// Error returned when no drawing store exists for a directory.
#[derive(Debug, Error)]
#[error("No drawing store found at {path:?}. Run: cadgrep index")]
pub struct StoreNotFoundError {
    pub path: PathBuf,
}
