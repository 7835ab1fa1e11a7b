//! Skip-list configuration and resolution.
//!
//! The skip list is a JSON file mapping category names to lists of entries.
//! An entry is either a plain string or a `{ "paths": [...], "comment": ... }`
//! group. Path categories match by substring containment, so a single
//! directory-style string covers every file beneath it. Feature categories
//! match feature names against anchored regexes.
//!
//! The resolver is read-only while tests run. The only mutation is
//! [`SkipList::remove_tests`], called once after scheduling has finished.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TestsuiteError};
use crate::result::{TestCaseResult, TestResultCode};

/// One element of a skip category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipEntry {
    /// Substring of a test path, or a feature-name pattern
    Pattern(String),
    /// Several patterns sharing a comment
    Group {
        paths: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

impl SkipEntry {
    /// All patterns carried by this entry.
    pub fn patterns(&self) -> &[String] {
        match self {
            SkipEntry::Pattern(p) => std::slice::from_ref(p),
            SkipEntry::Group { paths, .. } => paths,
        }
    }
}

/// Skip categories, in the order they appear in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipCategory {
    SkipList,
    LazySkipList,
    PermanentSkipList,
    HandlesanSkipList,
    UnsupportedFeatures,
    PermanentUnsupportedFeatures,
    IntlTests,
    PlatformSkipList,
}

impl SkipCategory {
    pub const ALL: [SkipCategory; 8] = [
        SkipCategory::SkipList,
        SkipCategory::LazySkipList,
        SkipCategory::PermanentSkipList,
        SkipCategory::HandlesanSkipList,
        SkipCategory::UnsupportedFeatures,
        SkipCategory::PermanentUnsupportedFeatures,
        SkipCategory::IntlTests,
        SkipCategory::PlatformSkipList,
    ];

    /// Key of this category in the configuration file.
    pub fn name(self) -> &'static str {
        match self {
            SkipCategory::SkipList => "skip_list",
            SkipCategory::LazySkipList => "lazy_skip_list",
            SkipCategory::PermanentSkipList => "permanent_skip_list",
            SkipCategory::HandlesanSkipList => "handlesan_skip_list",
            SkipCategory::UnsupportedFeatures => "unsupported_features",
            SkipCategory::PermanentUnsupportedFeatures => "permanent_unsupported_features",
            SkipCategory::IntlTests => "intl_tests",
            SkipCategory::PlatformSkipList => "platform_skip_list",
        }
    }

    /// Feature categories hold feature-name patterns rather than paths.
    pub fn is_feature_category(self) -> bool {
        matches!(
            self,
            SkipCategory::UnsupportedFeatures | SkipCategory::PermanentUnsupportedFeatures
        )
    }

    /// Result code reported for a test matched by this category.
    pub fn result_code(self) -> TestResultCode {
        match self {
            SkipCategory::PermanentSkipList | SkipCategory::PermanentUnsupportedFeatures => {
                TestResultCode::TestPermanentlySkipped
            }
            _ => TestResultCode::TestSkipped,
        }
    }

    fn skip_message(self) -> &'static str {
        match self {
            SkipCategory::PermanentSkipList => "Skipping test in permanent skip list",
            SkipCategory::IntlTests => "Skipping Intl test",
            SkipCategory::LazySkipList => "Skipping test in lazy skip list",
            SkipCategory::PlatformSkipList => "Skipping test on this platform",
            SkipCategory::UnsupportedFeatures => "Skipping unsupported feature",
            SkipCategory::PermanentUnsupportedFeatures => "Skipping permanently unsupported feature",
            _ => "Skipping test in skip list",
        }
    }
}

impl std::fmt::Display for SkipCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// On-disk skip-list schema.
///
/// Every category is optional. An absent category behaves as an empty list
/// and stays absent when the configuration is written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_list: Option<Vec<SkipEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lazy_skip_list: Option<Vec<SkipEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permanent_skip_list: Option<Vec<SkipEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handlesan_skip_list: Option<Vec<SkipEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_features: Option<Vec<SkipEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permanent_unsupported_features: Option<Vec<SkipEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intl_tests: Option<Vec<SkipEntry>>,
    /// Keyed by host platform (`std::env::consts::OS`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_skip_list: Option<IndexMap<String, Vec<SkipEntry>>>,
}

impl SkipConfig {
    /// Entries of a category; `platform` selects the platform list.
    pub fn entries(&self, category: SkipCategory, platform: &str) -> &[SkipEntry] {
        let list = match category {
            SkipCategory::SkipList => &self.skip_list,
            SkipCategory::LazySkipList => &self.lazy_skip_list,
            SkipCategory::PermanentSkipList => &self.permanent_skip_list,
            SkipCategory::HandlesanSkipList => &self.handlesan_skip_list,
            SkipCategory::UnsupportedFeatures => &self.unsupported_features,
            SkipCategory::PermanentUnsupportedFeatures => &self.permanent_unsupported_features,
            SkipCategory::IntlTests => &self.intl_tests,
            SkipCategory::PlatformSkipList => {
                return self
                    .platform_skip_list
                    .as_ref()
                    .and_then(|by_platform| by_platform.get(platform))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
            }
        };
        list.as_deref().unwrap_or(&[])
    }
}

/// Skip-list resolver bound to its source file.
#[derive(Debug, Clone)]
pub struct SkipList {
    path: PathBuf,
    config: SkipConfig,
    platform: String,
    /// Compiled feature patterns, one vector per feature category
    feature_patterns: HashMap<SkipCategory, Vec<Regex>>,
}

impl SkipList {
    /// Load and validate the skip list at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| TestsuiteError::SkipListRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SkipConfig =
            serde_json::from_str(&content).map_err(|source| TestsuiteError::SkipListParse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_config(path, config)
    }

    /// Build a resolver from an already decoded configuration.
    pub fn from_config(path: impl Into<PathBuf>, config: SkipConfig) -> Result<Self> {
        let mut feature_patterns = HashMap::new();
        for category in SkipCategory::ALL
            .into_iter()
            .filter(|c| c.is_feature_category())
        {
            let mut compiled = Vec::new();
            for entry in config.entries(category, "") {
                for pattern in entry.patterns() {
                    let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                        TestsuiteError::InvalidPattern {
                            category: category.name(),
                            pattern: pattern.clone(),
                            source,
                        }
                    })?;
                    compiled.push(regex);
                }
            }
            feature_patterns.insert(category, compiled);
        }

        Ok(Self {
            path: path.into(),
            config,
            platform: std::env::consts::OS.to_string(),
            feature_patterns,
        })
    }

    /// Override the host platform used for `platform_skip_list`.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &SkipConfig {
        &self.config
    }

    /// Whether `subject` (a test path or feature name) is matched by any
    /// entry of `category`.
    pub fn should_skip_cat(&self, subject: &str, category: SkipCategory) -> bool {
        if category.is_feature_category() {
            return self
                .feature_patterns
                .get(&category)
                .is_some_and(|patterns| patterns.iter().any(|re| re.is_match(subject)));
        }
        self.config
            .entries(category, &self.platform)
            .iter()
            .flat_map(SkipEntry::patterns)
            .any(|pattern| subject.contains(pattern.as_str()))
    }

    /// Check `categories` in priority order. The first matching category
    /// decides the result; `None` means the test is not skipped.
    pub fn try_skip(
        &self,
        subject: &str,
        categories: &[SkipCategory],
        full_test_name: &str,
    ) -> Option<TestCaseResult> {
        categories
            .iter()
            .copied()
            .find(|&category| self.should_skip_cat(subject, category))
            .map(|category| {
                TestCaseResult::new(full_test_name, category.result_code(), category.skip_message())
            })
    }

    /// Remove tests from `skip_list` and write the result back to disk.
    ///
    /// `tests` maps skip-list keys (`{suite}/{relative path}`) to the suite
    /// root directory they belong to. Directory and prefix entries covering
    /// a removed test are unfolded first so that sibling tests stay skipped.
    pub fn remove_tests(&mut self, tests: &BTreeMap<String, PathBuf>) -> Result<()> {
        if let Some(entries) = self.config.skip_list.take() {
            let before = entries.len();
            let mut remaining = Vec::new();
            for entry in unfold_top_level(tests, entries) {
                match entry {
                    SkipEntry::Pattern(pattern) => {
                        if !tests.contains_key(&pattern) {
                            remaining.push(SkipEntry::Pattern(pattern));
                        }
                    }
                    SkipEntry::Group { mut paths, comment } => {
                        paths.retain(|p| !tests.contains_key(p));
                        if !paths.is_empty() {
                            remaining.push(SkipEntry::Group { paths, comment });
                        }
                    }
                }
            }
            info!(
                before,
                after = remaining.len(),
                "removed passing tests from skip list"
            );
            self.config.skip_list = Some(remaining);
        }
        self.persist()
    }

    /// Write the configuration back to the file it was loaded from.
    pub fn persist(&self) -> Result<()> {
        let mut json = serde_json::to_string_pretty(&self.config)?;
        json.push('\n');
        fs::write(&self.path, json).map_err(|source| TestsuiteError::SkipListWrite {
            path: self.path.clone(),
            source,
        })
    }
}

/// Expand directory and prefix entries that cover any of `tests` into the
/// concrete files and directories beneath them.
///
/// Expansion goes one directory level per round and stops once no entry is
/// a strict prefix of a test key, except entries naming an existing file,
/// which are left alone. Every path covered before unfolding is still
/// covered afterwards.
pub fn unfold_top_level(
    tests: &BTreeMap<String, PathBuf>,
    entries: Vec<SkipEntry>,
) -> Vec<SkipEntry> {
    let mut unfolded = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            SkipEntry::Pattern(pattern) => unfolded.extend(
                unfold_patterns(tests, vec![pattern])
                    .into_iter()
                    .map(SkipEntry::Pattern),
            ),
            SkipEntry::Group { paths, comment } => unfolded.push(SkipEntry::Group {
                paths: unfold_patterns(tests, paths),
                comment,
            }),
        }
    }
    unfolded
}

fn unfold_patterns(tests: &BTreeMap<String, PathBuf>, patterns: Vec<String>) -> Vec<String> {
    let mut current = patterns;
    loop {
        let mut changed = false;
        let mut next = Vec::with_capacity(current.len());
        for pattern in current {
            match expand_once(tests, &pattern) {
                Some(children) => {
                    debug!(%pattern, count = children.len(), "unfolded skip entry");
                    next.extend(children);
                    changed = true;
                }
                None => next.push(pattern),
            }
        }
        current = next;
        if !changed {
            return current;
        }
    }
}

/// One level of expansion for `pattern`, or `None` if it needs none.
fn expand_once(tests: &BTreeMap<String, PathBuf>, pattern: &str) -> Option<Vec<String>> {
    let trimmed = pattern.trim_end_matches('/');
    let dir_only = trimmed.len() < pattern.len();
    let (test_key, suite_dir) = tests
        .iter()
        .find(|(key, _)| key.len() > pattern.len() && key.starts_with(pattern))?;
    debug!(%pattern, %test_key, "skip entry covers passing test");

    // Keys are `{suite name}/{relative path}` and the suite directory ends
    // with the suite name, so the key is relative to the suite's parent.
    let base_dir = suite_dir.parent().unwrap_or(Path::new(""));
    let abs = base_dir.join(trimmed);
    if abs.is_file() {
        return None;
    }

    let (parent, stem) = match trimmed.rsplit_once('/') {
        Some((parent, stem)) => (parent, stem),
        None => ("", trimmed),
    };
    let join = |dir: &str, name: &str| {
        if dir.is_empty() {
            name.to_string()
        } else {
            format!("{dir}/{name}")
        }
    };

    let mut children = Vec::new();
    if abs.is_dir() {
        children.extend(list_dir(&abs).into_iter().map(|name| join(trimmed, &name)));
    }
    // A bare prefix also covers siblings that merely start with it, while
    // `dir/` covers the directory only.
    if !dir_only {
        children.extend(
            list_dir(&base_dir.join(parent))
                .into_iter()
                .filter(|name| name.starts_with(stem) && name != stem)
                .map(|name| join(parent, &name)),
        );
    }

    if children.is_empty() {
        return None;
    }
    children.sort();
    Some(children)
}

fn list_dir(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}
