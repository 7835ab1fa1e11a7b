//! Per-suite source preprocessing.
//!
//! Turns the raw contents of a test file into the source the engine is
//! given, plus the metadata that decides how it is run and judged.

use std::collections::HashSet;
use std::fs;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::frontmatter::{ExpectedFailure, Frontmatter, FrontmatterError};
use crate::result::{TestCaseResult, TestResultCode};
use crate::skiplist::{SkipCategory, SkipList};
use crate::suite::{SuiteKind, TestSuite};

const TEST262_PRELUDE: &str = include_str!("harness/test262_prelude.js");
const MJSUNIT_SHIM: &str = include_str!("harness/mjsunit_shim.js");

/// Harness files every non-raw test262 test gets
const TEST262_DEFAULT_INCLUDES: [&str; 2] = ["sta.js", "assert.js"];
const TEST262_ASYNC_INCLUDE: &str = "doneprintHandle.js";

/// Which strictness variants a test must pass in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictMode {
    StrictOnly,
    NonStrictOnly,
    Both,
}

/// One generated variant of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Strict,
    NonStrict,
}

impl StrictMode {
    /// Variants to run, in order. The first failing one is reported.
    pub fn variants(self) -> &'static [Variant] {
        match self {
            StrictMode::StrictOnly => &[Variant::Strict],
            StrictMode::NonStrictOnly => &[Variant::NonStrict],
            StrictMode::Both => &[Variant::Strict, Variant::NonStrict],
        }
    }

    fn from_flags(meta: &Frontmatter) -> Self {
        if meta.has_flag("onlyStrict") {
            StrictMode::StrictOnly
        } else if meta.has_flag("noStrict") || meta.has_flag("raw") {
            StrictMode::NonStrictOnly
        } else {
            StrictMode::Both
        }
    }
}

impl Variant {
    pub fn is_strict(self) -> bool {
        self == Variant::Strict
    }

    /// Source for this variant.
    pub fn apply(self, source: &str) -> String {
        match self {
            Variant::Strict => format!("'use strict';\n{source}"),
            Variant::NonStrict => source.to_string(),
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Strict => write!(f, "strict"),
            Variant::NonStrict => write!(f, "non-strict"),
        }
    }
}

/// A preprocessed, runnable test
#[derive(Debug, Clone)]
pub struct TestCase {
    /// Final source, without any strictness directive
    pub source: String,
    /// Harness files inlined into `source`
    pub includes: Vec<String>,
    pub strict_mode: StrictMode,
    pub flags: Vec<String>,
    pub expected_failure: Option<ExpectedFailure>,
    pub features: Vec<String>,
}

impl TestCase {
    fn plain(source: &str) -> Self {
        Self {
            source: source.to_string(),
            includes: Vec::new(),
            strict_mode: StrictMode::NonStrictOnly,
            flags: Vec::new(),
            expected_failure: None,
            features: Vec::new(),
        }
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Build the runnable test case for `content`.
///
/// Errors are already-resolved results (missing harness files, malformed
/// metadata) and should be reported as-is.
pub fn generate_source(
    content: &str,
    suite: &TestSuite,
    full_test_name: &str,
) -> Result<TestCase, TestCaseResult> {
    let test_case = prepare_test(content, suite, full_test_name)?;
    inline_harness(test_case, suite, full_test_name)
}

/// Parse the test's metadata and decide its harness includes without
/// reading any harness file. `source` holds the test body only.
pub fn prepare_test(
    content: &str,
    suite: &TestSuite,
    full_test_name: &str,
) -> Result<TestCase, TestCaseResult> {
    let fail = |msg: String| TestCaseResult::new(full_test_name, TestResultCode::TestFailed, msg);
    match suite.kind {
        SuiteKind::Test262 => {
            let meta = Frontmatter::parse(content)
                .map_err(|e| fail(format!("Invalid test262 file: {e}")))?;
            Ok(test262_case(content, meta))
        }
        SuiteKind::Cves => {
            let meta = match Frontmatter::parse(content) {
                Ok(meta) => Some(meta),
                Err(FrontmatterError::Missing) => None,
                Err(e) => return Err(fail(format!("Invalid CVE test: {e}"))),
            };
            Ok(cve_case(content, meta))
        }
        SuiteKind::Mjsunit => Ok(TestCase {
            includes: vec!["mjsunit.js".to_string()],
            ..TestCase::plain(&replace_v8_pragmas(content))
        }),
        SuiteKind::Esprima | SuiteKind::Flow => Ok(TestCase::plain(content)),
    }
}

/// Prepend the suite's harness to a prepared test.
pub fn inline_harness(
    mut test_case: TestCase,
    suite: &TestSuite,
    full_test_name: &str,
) -> Result<TestCase, TestCaseResult> {
    let read = |path: std::path::PathBuf| {
        fs::read_to_string(&path).map_err(|e| {
            TestCaseResult::new(
                full_test_name,
                TestResultCode::TestFailed,
                format!("Failed to read harness file {}: {e}", path.display()),
            )
        })
    };
    let mut source = match suite.kind {
        SuiteKind::Test262 if !test_case.has_flag("raw") => {
            let mut source = String::from(TEST262_PRELUDE);
            source.push('\n');
            for include in &test_case.includes {
                source.push_str(&read(suite.directory.join("harness").join(include))?);
                source.push('\n');
            }
            source
        }
        SuiteKind::Mjsunit => {
            let mut source = read(suite.directory.join("mjsunit.js"))?;
            source.push('\n');
            source.push_str(MJSUNIT_SHIM);
            source.push('\n');
            source
        }
        _ => return Ok(test_case),
    };
    source.push_str(&test_case.source);
    test_case.source = source;
    Ok(test_case)
}

fn test262_case(content: &str, meta: Frontmatter) -> TestCase {
    let strict_mode = StrictMode::from_flags(&meta);
    let mut includes = Vec::new();
    if !meta.has_flag("raw") {
        includes.extend(TEST262_DEFAULT_INCLUDES.iter().map(|s| s.to_string()));
        if meta.has_flag("async") {
            includes.push(TEST262_ASYNC_INCLUDE.to_string());
        }
        for include in &meta.includes {
            if !includes.contains(include) {
                includes.push(include.clone());
            }
        }
    }

    TestCase {
        source: content.to_string(),
        includes,
        strict_mode,
        flags: meta.flags,
        expected_failure: meta.negative,
        features: meta.features,
    }
}

fn cve_case(content: &str, meta: Option<Frontmatter>) -> TestCase {
    match meta {
        Some(meta) => TestCase {
            strict_mode: StrictMode::from_flags(&meta),
            flags: meta.flags,
            expected_failure: meta.negative,
            features: meta.features,
            ..TestCase::plain(content)
        },
        None => TestCase::plain(content),
    }
}

/// Decide whether a preprocessed test has to be skipped because of its
/// flags, includes or features.
///
/// A feature listed as unsupported is still run when the engine itself
/// advertises it in `supported_features`.
pub fn skip_reason(
    test_case: &TestCase,
    suite: &TestSuite,
    skiplist: &SkipList,
    supported_features: &HashSet<String>,
    full_test_name: &str,
) -> Option<TestCaseResult> {
    if !matches!(suite.kind, SuiteKind::Test262 | SuiteKind::Cves) {
        return None;
    }
    let skipped = |msg: String| Some(TestCaseResult::skipped(full_test_name, msg));

    if test_case.has_flag("async") {
        return skipped("Skipping test with async".to_string());
    }
    if test_case.has_flag("module") {
        return skipped("Skipping test with modules".to_string());
    }
    if test_case.includes.iter().any(|i| i == "testIntl.js") {
        return skipped("Skipping test with testIntl.js".to_string());
    }

    for feature in &test_case.features {
        if supported_features.contains(feature) {
            continue;
        }
        if let Some(mut result) = skiplist.try_skip(
            feature,
            &[
                SkipCategory::PermanentUnsupportedFeatures,
                SkipCategory::UnsupportedFeatures,
            ],
            full_test_name,
        ) {
            result.msg = format!("{}: {feature}", result.msg);
            return Some(result);
        }
    }
    None
}

static V8_PRAGMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%_?[A-Z][A-Za-z]*").expect("valid pragma regex"));

/// JS replacement for a V8 intrinsic, if the shim knows it.
fn v8_pragma_replacement(pragma: &str) -> Option<&'static str> {
    let replacement = match pragma {
        "%OptimizeObjectForAddingMultipleProperties"
        | "%ClearFunctionTypeFeedback"
        | "%OptimizeFunctionOnNextCall"
        | "%PrepareFunctionForOptimization"
        | "%DeoptimizeFunction"
        | "%DeoptimizeNow"
        | "%_DeoptimizeNow"
        | "%NeverOptimizeFunction"
        | "%OptimizeOsr"
        | "%BaselineFunctionOnNextCall"
        | "%SetForceInlineFlag"
        | "%ToFastProperties"
        | "%NormalizeElements"
        | "%RunMicrotasks"
        | "%SetAllocationTimeout"
        | "%UnblockConcurrentRecompilation"
        | "%DebugPrint"
        | "%CollectGarbage" => "builtin_nop",
        "%HasFastDoubleElements"
        | "%HasFastSmiElements"
        | "%HasFastObjectElements"
        | "%HasFastHoleyElements"
        | "%HasFastProperties"
        | "%HasDictionaryElements"
        | "%IsAsmWasmCode"
        | "%IsNotAsmWasmCode"
        | "%NotifyContextDisposed" => "v8pragma_NopSentinel",
        "%RunningInSimulator" | "%IsConcurrentRecompilationSupported" => "builtin_false",
        "%HaveSameMap" => "v8pragma_HaveSameMap",
        "%FunctionSetPrototype" => "v8pragma_FunctionSetPrototype",
        "%_ClassOf" => "v8pragma_ClassOf",
        "%_Call" => "v8pragma_Call",
        "%_StringCharFromCode" => "v8pragma_StringCharFromCode",
        "%_StringCharCodeAt" => "v8pragma_StringCharCodeAt",
        "%ArrayBufferDetach" | "%ArrayBufferNeuter" => "v8pragma_ArrayBufferDetach",
        _ => return None,
    };
    Some(replacement)
}

/// Rewrite known V8 `%Intrinsic` calls to shim functions.
pub fn replace_v8_pragmas(content: &str) -> String {
    V8_PRAGMA
        .replace_all(content, |caps: &Captures<'_>| {
            let pragma = &caps[0];
            v8_pragma_replacement(pragma)
                .map(str::to_string)
                .unwrap_or_else(|| pragma.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skiplist::SkipConfig;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn test262_suite(dir: &Path) -> TestSuite {
        let directory = dir.join("test262");
        fs::create_dir_all(directory.join("harness")).unwrap();
        fs::write(directory.join("harness/sta.js"), "// sta").unwrap();
        fs::write(directory.join("harness/assert.js"), "// assert").unwrap();
        fs::write(directory.join("harness/compareArray.js"), "// compareArray").unwrap();
        fs::write(directory.join("harness/doneprintHandle.js"), "// done").unwrap();
        TestSuite {
            kind: SuiteKind::Test262,
            directory,
        }
    }

    fn skiplist(json: &str) -> SkipList {
        let config: SkipConfig = serde_json::from_str(json).unwrap();
        SkipList::from_config("skiplist.json", config).unwrap()
    }

    #[test]
    fn test_test262_inlines_harness_and_flags() {
        let dir = tempdir().unwrap();
        let suite = test262_suite(dir.path());
        let content = "/*---\nflags: [onlyStrict]\nincludes: [compareArray.js]\n---*/\nfoo();";
        let case = generate_source(content, &suite, "test262::a.js").unwrap();

        assert_eq!(case.strict_mode, StrictMode::StrictOnly);
        assert_eq!(case.includes, vec!["sta.js", "assert.js", "compareArray.js"]);
        let sta = case.source.find("// sta").unwrap();
        let assert = case.source.find("// assert").unwrap();
        let body = case.source.find("foo();").unwrap();
        assert!(case.source.starts_with(TEST262_PRELUDE));
        assert!(sta < assert && assert < body);
    }

    #[test]
    fn test_test262_strict_modes() {
        let dir = tempdir().unwrap();
        let suite = test262_suite(dir.path());
        let mode = |flags: &str| {
            let content = format!("/*---\nflags: [{flags}]\n---*/\n");
            generate_source(&content, &suite, "t").unwrap().strict_mode
        };
        assert_eq!(mode("onlyStrict"), StrictMode::StrictOnly);
        assert_eq!(mode("noStrict"), StrictMode::NonStrictOnly);
        assert_eq!(mode(""), StrictMode::Both);
        assert_eq!(StrictMode::Both.variants(), &[Variant::Strict, Variant::NonStrict]);
    }

    #[test]
    fn test_test262_raw_is_untouched() {
        let dir = tempdir().unwrap();
        let suite = test262_suite(dir.path());
        let content = "/*---\nflags: [raw]\n---*/\n'raw';";
        let case = generate_source(content, &suite, "t").unwrap();
        assert_eq!(case.source, content);
        assert_eq!(case.strict_mode, StrictMode::NonStrictOnly);
        assert!(case.includes.is_empty());
    }

    #[test]
    fn test_test262_requires_frontmatter_and_harness() {
        let dir = tempdir().unwrap();
        let suite = test262_suite(dir.path());
        let err = generate_source("var x;", &suite, "t").unwrap_err();
        assert_eq!(err.code, TestResultCode::TestFailed);

        let err = generate_source("/*---\nincludes: [missing.js]\n---*/", &suite, "t").unwrap_err();
        assert!(err.msg.contains("missing.js"));
    }

    #[test]
    fn test_skip_is_decided_before_harness_is_read() {
        let suite = TestSuite {
            kind: SuiteKind::Test262,
            directory: PathBuf::from("/nonexistent/test262"),
        };
        let list = skiplist(r#"{ "unsupported_features": ["Atomics"] }"#);
        let none = HashSet::new();
        for frontmatter in ["flags: [async]", "flags: [module]", "features: [Atomics]"] {
            let content = format!("/*---\n{frontmatter}\n---*/\n");
            let case = prepare_test(&content, &suite, "t").unwrap();
            assert_eq!(case.source, content);
            let result = skip_reason(&case, &suite, &list, &none, "t").unwrap();
            assert_eq!(result.code, TestResultCode::TestSkipped, "{frontmatter}");
        }

        let case = prepare_test("/*---\n---*/\n", &suite, "t").unwrap();
        let err = inline_harness(case, &suite, "t").unwrap_err();
        assert_eq!(err.code, TestResultCode::TestFailed);
        assert!(err.msg.contains("sta.js"));
    }

    #[test]
    fn test_cves_frontmatter_is_optional() {
        let suite = TestSuite {
            kind: SuiteKind::Cves,
            directory: PathBuf::from("/nonexistent/CVEs"),
        };
        let case = generate_source("crash();", &suite, "CVEs::a.js").unwrap();
        assert_eq!(case.source, "crash();");
        assert_eq!(case.strict_mode, StrictMode::NonStrictOnly);

        let content = "/*---\nnegative:\n  phase: runtime\n  type: Error\n---*/\nthrow 1;";
        let case = generate_source(content, &suite, "CVEs::b.js").unwrap();
        assert_eq!(case.strict_mode, StrictMode::Both);
        assert!(!case.expected_failure.unwrap().phase.is_compile_time());
    }

    #[test]
    fn test_mjsunit_prepends_harness_and_shim() {
        let dir = tempdir().unwrap();
        let directory = dir.path().join("mjsunit");
        fs::create_dir_all(&directory).unwrap();
        fs::write(directory.join("mjsunit.js"), "// mjsunit harness").unwrap();
        let suite = TestSuite {
            kind: SuiteKind::Mjsunit,
            directory,
        };
        let case = generate_source("%OptimizeFunctionOnNextCall(f);", &suite, "m").unwrap();
        assert!(case.source.starts_with("// mjsunit harness"));
        assert!(case.source.contains("function v8pragma_HaveSameMap"));
        assert!(case.source.ends_with("builtin_nop(f);"));
        assert_eq!(case.strict_mode, StrictMode::NonStrictOnly);
    }

    #[test]
    fn test_pragma_replacement() {
        assert_eq!(
            replace_v8_pragmas("assertTrue(%HaveSameMap(a, b)); x = 7 %Unknown(y) % 2;"),
            "assertTrue(v8pragma_HaveSameMap(a, b)); x = 7 %Unknown(y) % 2;"
        );
        assert_eq!(
            replace_v8_pragmas("%_ClassOf(o); %ArrayBufferDetach(buf); %RunningInSimulator()"),
            "v8pragma_ClassOf(o); v8pragma_ArrayBufferDetach(buf); builtin_false()"
        );
    }

    #[test]
    fn test_skip_reason_flags_and_features() {
        let dir = tempdir().unwrap();
        let suite = test262_suite(dir.path());
        let list = skiplist(
            r#"{ "unsupported_features": ["Atomics", "Intl"],
                 "permanent_unsupported_features": ["tail-call-optimization"] }"#,
        );
        let none = HashSet::new();
        let case = |frontmatter: &str| {
            generate_source(&format!("/*---\n{frontmatter}\n---*/\n"), &suite, "t").unwrap()
        };

        let result = skip_reason(&case("flags: [async]"), &suite, &list, &none, "t").unwrap();
        assert_eq!(result.code, TestResultCode::TestSkipped);
        assert!(skip_reason(&case("flags: [module]"), &suite, &list, &none, "t").is_some());

        let atomics = case("features: [Atomics]");
        let result = skip_reason(&atomics, &suite, &list, &none, "t").unwrap();
        assert!(result.msg.ends_with("Atomics"));
        let probed = HashSet::from(["Atomics".to_string()]);
        assert!(skip_reason(&atomics, &suite, &list, &probed, "t").is_none());

        let tco = case("features: [tail-call-optimization]");
        let result = skip_reason(&tco, &suite, &list, &none, "t").unwrap();
        assert_eq!(result.code, TestResultCode::TestPermanentlySkipped);

        assert!(skip_reason(&case("features: [Proxy]"), &suite, &list, &none, "t").is_none());
    }

    #[test]
    fn test_variant_source() {
        assert_eq!(Variant::Strict.apply("x;"), "'use strict';\nx;");
        assert_eq!(Variant::NonStrict.apply("x;"), "x;");
    }
}
