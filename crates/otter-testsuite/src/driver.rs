//! Run-level orchestration.
//!
//! Discovers tests, resolves skip-list hits before anything is scheduled,
//! runs the rest through the bounded scheduler and finally offers to drop
//! skip-listed tests that now pass.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::engine::{ExecMode, ExecOptions, check_binaries, probe_features};
use crate::error::{Result, TestsuiteError};
use crate::preprocess::{StrictMode, generate_source};
use crate::progress::TestingProgress;
use crate::report::{RunSummary, print_removal_candidates};
use crate::result::{TestCaseResult, TestResultCode};
use crate::runner::{RunContext, TestFile, run_test};
use crate::scheduler::run_bounded;
use crate::skiplist::{SkipCategory, SkipList};
use crate::suite::{classify, common_root, discover_tests};

/// Everything a run needs, already merged from config file and flags
#[derive(Debug)]
pub struct RunOptions {
    pub paths: Vec<PathBuf>,
    /// Persistent work directory, wiped first. A temporary one otherwise.
    pub work_dir: Option<PathBuf>,
    pub jobs: usize,
    /// Run tests even if the skip list names them
    pub test_skiplist: bool,
    /// Run tests listed in `intl_tests`
    pub test_intl: bool,
    pub fail_fast: bool,
    pub verbose: bool,
    pub show_slowest: usize,
    pub json_report: Option<PathBuf>,
    /// Answer the removal prompt with yes
    pub assume_yes: bool,
    pub exec: ExecOptions,
}

/// A test that is run although a skip category names it
#[derive(Debug, Clone)]
struct Remembered {
    skiplist_key: String,
    suite_dir: PathBuf,
    /// Listed as failing, as opposed to merely excluded (intl)
    expected_to_fail: bool,
}

/// Run every test under `options.paths`. Returns whether any test failed.
pub async fn run(options: RunOptions, mut skiplist: SkipList) -> Result<bool> {
    check_binaries(&options.exec.binary_dir, options.exec.mode)?;

    let tests = discover_tests(&options.paths)?;
    let tests_home = common_root(&options.paths);
    info!(count = tests.len(), home = %tests_home.display(), "discovered tests");

    let (work_dir, _temp_guard) = prepare_work_dir(options.work_dir.as_deref())?;
    debug!(work_dir = %work_dir.display(), "using work directory");

    let supported_features = probe_features(&options.exec.binary_dir).await;
    debug!(?supported_features, "engine features");

    let start = Instant::now();
    let mut progress = TestingProgress::new(tests.len(), options.jobs, options.verbose);
    let mut summary = RunSummary::new(options.show_slowest);
    let mut remembered: BTreeMap<String, Remembered> = BTreeMap::new();
    let mut planned = Vec::with_capacity(tests.len());

    let mut transient = vec![SkipCategory::SkipList, SkipCategory::PlatformSkipList];
    if options.exec.mode == ExecMode::Lazy {
        transient.push(SkipCategory::LazySkipList);
    }

    for path in tests {
        let Some(test) = TestFile::new(path) else {
            continue;
        };
        let subject = test.subject();
        let name = test.full_test_name.as_str();

        if let Some(result) = skiplist.try_skip(&subject, &[SkipCategory::PermanentSkipList], name) {
            progress.update(&result);
            summary.record(result, None);
            continue;
        }

        let remember = |expected_to_fail| Remembered {
            skiplist_key: test.skiplist_key(),
            suite_dir: test.suite.directory.clone(),
            expected_to_fail,
        };
        if let Some(result) = skiplist.try_skip(&subject, &transient, name) {
            if !options.test_skiplist {
                progress.update(&result);
                summary.record(result, None);
                continue;
            }
            remembered.insert(name.to_string(), remember(true));
        }
        if let Some(mut result) = skiplist.try_skip(&subject, &[SkipCategory::IntlTests], name) {
            if !options.test_intl {
                result.msg = format!("{} (use --test-intl to run)", result.msg);
                progress.update(&result);
                summary.record(result, None);
                continue;
            }
            remembered
                .entry(name.to_string())
                .or_insert_with(|| remember(false));
        }
        planned.push(test);
    }

    let ctx = RunContext {
        tests_home,
        work_dir,
        skiplist: &skiplist,
        exec: options.exec.clone(),
        supported_features,
    };
    let ctx = &ctx;
    let remembered = &remembered;
    let mut candidates: BTreeMap<String, PathBuf> = BTreeMap::new();

    let not_started = run_bounded(
        planned,
        options.jobs,
        options.fail_fast,
        |test| async move {
            let result = run_test(&test, ctx).await;
            judge_remembered(result, remembered.get(&test.full_test_name))
        },
        |result: &TestCaseResult| result.code.is_failure(),
        |completed| {
            let result = completed.result;
            progress.update(&result);
            if let Some(entry) = remembered.get(&result.test_name) {
                if matches!(
                    result.code,
                    TestResultCode::TestPassed
                        | TestResultCode::TestSkipped
                        | TestResultCode::TestUnexpectedPassed
                ) {
                    candidates.insert(entry.skiplist_key.clone(), entry.suite_dir.clone());
                }
            }
            summary.record(result, Some(completed.duration));
        },
    )
    .await;

    progress.finish();
    summary.not_started = not_started;
    summary.elapsed = start.elapsed();

    summary.print_summary();
    summary.print_failures();
    summary.print_slowest();
    if let Some(path) = &options.json_report {
        summary.to_report().write(path)?;
        info!(path = %path.display(), "wrote JSON report");
    }

    // Intl entries are whole directories that are only run on demand, so
    // only a skip-list run may shrink the skip list.
    if !candidates.is_empty() && options.test_skiplist {
        print_removal_candidates(&candidates);
        if options.assume_yes || confirm("\nRemove these passed tests from skiplist? [y]es/[n]o: ") {
            skiplist.remove_tests(&candidates)?;
            println!("Updated {}", skiplist.path().display());
        }
    }

    Ok(summary.has_failures())
}

/// A skip-listed test that passes is reported as an unexpected pass.
fn judge_remembered(mut result: TestCaseResult, remembered: Option<&Remembered>) -> TestCaseResult {
    if result.code == TestResultCode::TestPassed && remembered.is_some_and(|r| r.expected_to_fail) {
        result.code = TestResultCode::TestUnexpectedPassed;
        result.msg = "Test in skip list passed".to_string();
    }
    result
}

fn prepare_work_dir(work_dir: Option<&Path>) -> Result<(PathBuf, Option<TempDir>)> {
    let work_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| TestsuiteError::WorkDir { path, source }
    };
    match work_dir {
        Some(dir) => {
            if dir.exists() {
                std::fs::remove_dir_all(dir).map_err(work_err(dir))?;
            }
            std::fs::create_dir_all(dir).map_err(work_err(dir))?;
            Ok((dir.to_path_buf(), None))
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix("testsuite")
                .tempdir()
                .map_err(work_err(&std::env::temp_dir()))?;
            Ok((temp.path().to_path_buf(), Some(temp)))
        }
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Source the engine would be given for `path`, with the strict directive
/// when the test is strict-only.
pub fn preprocessed_source(path: &Path) -> Result<String> {
    let suite = classify(path).ok_or_else(|| TestsuiteError::InvalidPath(path.to_path_buf()))?;
    let content = std::fs::read_to_string(path)?;
    if suite.kind.is_ast_check() {
        return Ok(content);
    }
    let test_case = generate_source(&content, &suite, &suite.full_test_name(path)).map_err(
        |result| TestsuiteError::Preprocess {
            path: path.to_path_buf(),
            msg: result.msg,
        },
    )?;
    Ok(if test_case.strict_mode == StrictMode::StrictOnly {
        format!("'use strict';\n{}", test_case.source)
    } else {
        test_case.source
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_judge_remembered() {
        let listed = Remembered {
            skiplist_key: "test262/a.js".into(),
            suite_dir: PathBuf::from("/x/test262"),
            expected_to_fail: true,
        };
        let intl = Remembered {
            expected_to_fail: false,
            ..listed.clone()
        };

        let passed = || TestCaseResult::passed("test262::a.js");
        assert_eq!(
            judge_remembered(passed(), Some(&listed)).code,
            TestResultCode::TestUnexpectedPassed
        );
        assert_eq!(judge_remembered(passed(), Some(&intl)).code, TestResultCode::TestPassed);
        assert_eq!(judge_remembered(passed(), None).code, TestResultCode::TestPassed);

        let failed = TestCaseResult::new("test262::a.js", TestResultCode::ExecuteFailed, "boom");
        assert_eq!(
            judge_remembered(failed, Some(&listed)).code,
            TestResultCode::ExecuteFailed
        );
    }

    #[test]
    fn test_work_dir_is_wiped() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(work.join("stale")).unwrap();

        let (path, guard) = prepare_work_dir(Some(&work)).unwrap();
        assert_eq!(path, work);
        assert!(guard.is_none());
        assert!(work.is_dir());
        assert!(!work.join("stale").exists());

        let (path, guard) = prepare_work_dir(None).unwrap();
        assert!(path.is_dir());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_preprocessed_source() {
        let dir = tempfile::tempdir().unwrap();
        let suite_dir = dir.path().join("test262");
        fs::create_dir_all(suite_dir.join("harness")).unwrap();
        fs::write(suite_dir.join("harness/sta.js"), "// sta").unwrap();
        fs::write(suite_dir.join("harness/assert.js"), "// assert").unwrap();
        let test = suite_dir.join("a.js");
        fs::write(&test, "/*---\nflags: [onlyStrict]\n---*/\nfoo();").unwrap();

        let source = preprocessed_source(&test).unwrap();
        assert!(source.starts_with("'use strict';\n"));
        assert!(source.contains("// assert"));

        let other = dir.path().join("other.js");
        fs::write(&other, "").unwrap();
        assert!(matches!(
            preprocessed_source(&other),
            Err(TestsuiteError::InvalidPath(_))
        ));
    }
}
