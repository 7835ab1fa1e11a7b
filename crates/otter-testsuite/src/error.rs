//! Run-level error types.
//!
//! Individual test failures never show up here: they are folded into a
//! [`TestCaseResult`](crate::result::TestCaseResult). Only problems that make
//! the whole run meaningless (configuration, skip-list I/O, missing engine
//! binaries) are reported as errors.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TestsuiteError>;

#[derive(Debug, Error)]
pub enum TestsuiteError {
    #[error("Failed to read skip list '{path}': {source}")]
    SkipListRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse skip list '{path}': {source}")]
    SkipListParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write skip list '{path}': {source}")]
    SkipListWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid pattern '{pattern}' in skip category {category}: {source}")]
    InvalidPattern {
        category: &'static str,
        pattern: String,
        source: regex::Error,
    },

    #[error("Failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Engine binary not found: {0}")]
    MissingBinary(PathBuf),

    #[error("Invalid test path: {0}")]
    InvalidPath(PathBuf),

    #[error("Failed to preprocess '{path}': {msg}")]
    Preprocess { path: PathBuf, msg: String },

    #[error("Failed to prepare work directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
