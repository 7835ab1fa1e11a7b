//! Suite classification and test discovery

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, TestsuiteError};

/// The conformance suites the runner knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuiteKind {
    Test262,
    Mjsunit,
    Cves,
    Esprima,
    Flow,
}

impl SuiteKind {
    /// Classification order: the first marker found in a path wins.
    pub const ALL: [SuiteKind; 5] = [
        SuiteKind::Test262,
        SuiteKind::Mjsunit,
        SuiteKind::Cves,
        SuiteKind::Esprima,
        SuiteKind::Flow,
    ];

    /// Directory name identifying the suite inside a path.
    pub fn dir_name(self) -> &'static str {
        match self {
            SuiteKind::Test262 => "test262",
            SuiteKind::Mjsunit => "mjsunit",
            SuiteKind::Cves => "CVEs",
            SuiteKind::Esprima => "esprima",
            SuiteKind::Flow => "flow",
        }
    }

    /// AST-check suites dump and compare ASTs instead of executing.
    pub fn is_ast_check(self) -> bool {
        matches!(self, SuiteKind::Esprima | SuiteKind::Flow)
    }
}

impl std::fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A suite together with the root directory it was found under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    pub kind: SuiteKind,
    /// Path up to and including the suite's marker directory
    pub directory: PathBuf,
}

impl TestSuite {
    /// Name of the suite's root directory.
    pub fn name(&self) -> &str {
        self.kind.dir_name()
    }

    /// Path of `test_file` relative to the suite root, with `/` separators.
    pub fn relative_path(&self, test_file: &Path) -> String {
        let rel = test_file
            .strip_prefix(&self.directory)
            .unwrap_or(test_file)
            .to_string_lossy()
            .into_owned();
        if rel.contains('\\') {
            rel.replace('\\', "/")
        } else {
            rel
        }
    }

    /// `{suite}::{relative path}`
    pub fn full_test_name(&self, test_file: &Path) -> String {
        format!("{}::{}", self.name(), self.relative_path(test_file))
    }

    /// `{suite}/{relative path}`, the form entries take in the skip list.
    pub fn skiplist_key(&self, test_file: &Path) -> String {
        format!("{}/{}", self.name(), self.relative_path(test_file))
    }

    /// Whether `test_file` is a test rather than a harness or fixture file.
    pub fn is_test_file(&self, test_file: &Path) -> bool {
        let rel = self.relative_path(test_file);
        match self.kind {
            SuiteKind::Test262 => !rel.starts_with("harness/") && !rel.contains("_FIXTURE"),
            SuiteKind::Mjsunit => rel != "mjsunit.js",
            _ => true,
        }
    }
}

/// Determine which suite owns `path`, or `None` if it belongs to none.
pub fn classify(path: &Path) -> Option<TestSuite> {
    let path_str = path.to_string_lossy().replace('\\', "/");
    SuiteKind::ALL.into_iter().find_map(|kind| {
        let marker = format!("{}/", kind.dir_name());
        let pos = path_str.find(&marker)?;
        Some(TestSuite {
            kind,
            directory: PathBuf::from(&path_str[..pos + kind.dir_name().len()]),
        })
    })
}

/// Collect every runnable `.js` test under `paths`, sorted.
pub fn discover_tests(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            files.extend(
                WalkDir::new(path)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path()),
            );
        } else {
            return Err(TestsuiteError::InvalidPath(path.clone()));
        }
    }

    files.retain(|f| {
        f.extension().is_some_and(|ext| ext == "js")
            && classify(f).is_some_and(|suite| suite.is_test_file(f))
    });
    files.sort();
    files.dedup();
    Ok(files)
}

/// Longest common directory of `paths`. A file contributes its parent.
pub fn common_root(paths: &[PathBuf]) -> PathBuf {
    let dirs: Vec<&Path> = paths
        .iter()
        .map(|p| {
            if p.is_file() {
                p.parent().unwrap_or(Path::new(""))
            } else {
                p.as_path()
            }
        })
        .collect();

    let Some((first, rest)) = dirs.split_first() else {
        return PathBuf::new();
    };
    let mut common: Vec<_> = first.components().collect();
    for dir in rest {
        let shared = common
            .iter()
            .zip(dir.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        common.truncate(shared);
    }
    common.into_iter().collect()
}
