//! Per-test dispatch: classify → skip checks → preprocess → execute → judge.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ast::run_ast_test;
use crate::engine::{ExecOptions, compile_and_run};
use crate::preprocess::{inline_harness, prepare_test, skip_reason};
use crate::result::{TestCaseResult, TestResultCode};
use crate::skiplist::{SkipCategory, SkipList};
use crate::suite::{TestSuite, classify};

/// A discovered test together with its suite
#[derive(Debug, Clone)]
pub struct TestFile {
    pub path: PathBuf,
    pub suite: TestSuite,
    /// `{suite}::{relative path}`
    pub full_test_name: String,
}

impl TestFile {
    /// `None` if no suite claims `path`.
    pub fn new(path: PathBuf) -> Option<Self> {
        let suite = classify(&path)?;
        let full_test_name = suite.full_test_name(&path);
        Some(Self {
            path,
            suite,
            full_test_name,
        })
    }

    /// Path string the skip list is matched against.
    pub fn subject(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    pub fn skiplist_key(&self) -> String {
        self.suite.skiplist_key(&self.path)
    }
}

/// State shared by every test of a run. Read-only while tests execute.
pub struct RunContext<'a> {
    /// Common root of all inputs
    pub tests_home: PathBuf,
    pub work_dir: PathBuf,
    pub skiplist: &'a SkipList,
    pub exec: ExecOptions,
    /// Features the engine reported as built in
    pub supported_features: HashSet<String>,
}

impl RunContext<'_> {
    /// Work files of `test` live under this stem, mirroring its location
    /// below `tests_home`.
    pub fn work_stem(&self, test: &TestFile) -> PathBuf {
        let rel = match test.path.strip_prefix(&self.tests_home) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => Path::new(test.suite.name()).join(test.suite.relative_path(&test.path)),
        };
        self.work_dir.join(rel.with_extension(""))
    }
}

/// Run a single test to completion. Never fails: every problem becomes a
/// result code.
pub async fn run_test(test: &TestFile, ctx: &RunContext<'_>) -> TestCaseResult {
    let name = test.full_test_name.as_str();
    let fail = |msg: String| TestCaseResult::new(name, TestResultCode::TestFailed, msg);

    let work_stem = ctx.work_stem(test);
    if let Some(parent) = work_stem.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return fail(format!("Failed to create {}: {e}", parent.display()));
        }
    }

    if test.suite.kind.is_ast_check() {
        return run_ast_test(name, test.suite.kind, &test.path, &work_stem, &ctx.exec).await;
    }

    let content = match tokio::fs::read(&test.path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => return fail(format!("Failed to read test: {e}")),
    };
    let test_case = match prepare_test(&content, &test.suite, name) {
        Ok(test_case) => test_case,
        Err(result) => return result,
    };
    if let Some(result) = skip_reason(
        &test_case,
        &test.suite,
        ctx.skiplist,
        &ctx.supported_features,
        name,
    ) {
        return result;
    }
    let test_case = match inline_harness(test_case, &test.suite, name) {
        Ok(test_case) => test_case,
        Err(result) => return result,
    };

    let sanitized;
    let opts = if ctx
        .skiplist
        .should_skip_cat(&test.subject(), SkipCategory::HandlesanSkipList)
    {
        debug!(test = name, "handle sanitizer disabled");
        sanitized = ExecOptions {
            disable_handle_san: true,
            ..ctx.exec.clone()
        };
        &sanitized
    } else {
        &ctx.exec
    };

    compile_and_run(
        name,
        &test_case.source,
        test_case.strict_mode,
        &work_stem,
        test_case.expected_failure.as_ref(),
        opts,
    )
    .await
}
