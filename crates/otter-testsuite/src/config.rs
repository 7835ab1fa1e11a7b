//! TOML configuration for the testsuite runner

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, TestsuiteError};

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "testsuite.toml";

/// Runner configuration loaded from TOML file.
///
/// Every field is optional; command-line flags take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestsuiteConfig {
    /// Directory containing the engine binaries
    pub binary_dir: Option<PathBuf>,

    /// Skip list JSON file
    pub skiplist: Option<PathBuf>,

    /// Maximum number of concurrently running tests
    pub jobs: Option<usize>,

    /// Per-phase timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Extra flags passed to every compiler invocation
    pub compile_args: Vec<String>,

    /// Extra flags passed to every VM invocation
    pub vm_args: Vec<String>,
}

impl TestsuiteConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| TestsuiteError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| TestsuiteError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else `testsuite.toml` if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }
}
