//! Test262-style frontmatter parsing
//!
//! Test files carry YAML metadata between `/*---` and `---*/`. CVE regression
//! tests reuse the same format but usually omit the license header.

use serde::{Deserialize, Serialize};

/// Test metadata (from YAML frontmatter)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Frontmatter {
    /// Test description
    #[serde(default)]
    pub description: Option<String>,

    /// Features required by this test
    #[serde(default)]
    pub features: Vec<String>,

    /// Test flags
    #[serde(default)]
    pub flags: Vec<String>,

    /// Negative test expectation
    #[serde(default)]
    pub negative: Option<ExpectedFailure>,

    /// Includes (harness files)
    #[serde(default)]
    pub includes: Vec<String>,
}

/// Expected failure of a negative test
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExpectedFailure {
    /// Phase when error should occur
    pub phase: ErrorPhase,
    /// Expected error type
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Phase when an error is expected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    /// Parse-time error
    Parse,
    /// Early error (static semantics)
    Early,
    /// Resolution error (module linking)
    Resolution,
    /// Runtime error
    Runtime,
}

impl ErrorPhase {
    /// Whether the error must be raised by the compiler.
    pub fn is_compile_time(self) -> bool {
        matches!(self, ErrorPhase::Parse | ErrorPhase::Early)
    }
}

/// Why frontmatter could not be extracted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrontmatterError {
    #[error("missing frontmatter block")]
    Missing,
    #[error("malformed frontmatter: {0}")]
    Malformed(String),
}

impl Frontmatter {
    /// Parse metadata from test file content
    pub fn parse(content: &str) -> Result<Self, FrontmatterError> {
        let start = content.find("/*---").ok_or(FrontmatterError::Missing)?;
        let end = content[start..]
            .find("---*/")
            .map(|offset| start + offset)
            .ok_or(FrontmatterError::Missing)?;

        let yaml_content = &content[start + 5..end];
        serde_yaml::from_str::<Option<Self>>(yaml_content)
            .map(Option::unwrap_or_default)
            .map_err(|e| FrontmatterError::Malformed(e.to_string()))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}
