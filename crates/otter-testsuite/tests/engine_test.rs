//! Engine adapter tests against scripted fake binaries.

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{engine_dir, exec_options, write};
use otter_testsuite::ExecMode;
use otter_testsuite::ast::run_ast_test;
use otter_testsuite::engine::{compile_and_run, probe_features};
use otter_testsuite::frontmatter::{ErrorPhase, ExpectedFailure};
use otter_testsuite::preprocess::StrictMode;
use otter_testsuite::{SuiteKind, TestResultCode};

fn negative(phase: ErrorPhase) -> ExpectedFailure {
    ExpectedFailure {
        phase,
        error_type: "SyntaxError".to_string(),
    }
}

#[tokio::test]
async fn test_passes_in_both_variants() {
    let work = tempfile::tempdir().unwrap();
    let stem = work.path().join("ok");
    let opts = exec_options(ExecMode::Bytecode);

    let result = compile_and_run("cves::ok.js", "print(1);", StrictMode::Both, &stem, None, &opts).await;
    assert_eq!(result.code, TestResultCode::TestPassed, "{result:?}");
    assert!(work.path().join("ok.strict.js").is_file());
    assert!(work.path().join("ok.sloppy.js").is_file());
    assert!(work.path().join("ok.strict.js.hbc").is_file());
}

#[tokio::test]
async fn test_strict_only_failure_names_variant() {
    let work = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Bytecode);

    let result = compile_and_run(
        "cves::strict.js",
        "STRICT_THROW;",
        StrictMode::Both,
        &work.path().join("strict"),
        None,
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::ExecuteFailed);
    assert!(result.msg.ends_with("(strict)"), "{}", result.msg);
    assert!(result.output.as_deref().unwrap_or_default().contains("Uncaught TypeError"));

    let result = compile_and_run(
        "cves::strict.js",
        "STRICT_THROW;",
        StrictMode::NonStrictOnly,
        &work.path().join("sloppy"),
        None,
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::TestPassed);
}

#[tokio::test]
async fn test_negative_parse_test() {
    let work = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Bytecode);
    let expected = negative(ErrorPhase::Parse);

    let result = compile_and_run(
        "test262::bad.js",
        "SYNTAX_ERROR",
        StrictMode::Both,
        &work.path().join("bad"),
        Some(&expected),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::TestPassed);

    let result = compile_and_run(
        "test262::good.js",
        "print(1);",
        StrictMode::Both,
        &work.path().join("good"),
        Some(&expected),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::CompileFailed);
    assert!(result.msg.starts_with("Compilation failure expected"));
}

#[tokio::test]
async fn test_negative_runtime_test() {
    let work = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Bytecode);
    let expected = negative(ErrorPhase::Runtime);

    let result = compile_and_run(
        "test262::throws.js",
        "THROW;",
        StrictMode::Both,
        &work.path().join("throws"),
        Some(&expected),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::TestPassed);

    let result = compile_and_run(
        "test262::quiet.js",
        "print(1);",
        StrictMode::StrictOnly,
        &work.path().join("quiet"),
        Some(&expected),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::ExecuteFailed);
    assert_eq!(result.msg, "Expected execution to throw (strict)");
}

#[tokio::test]
async fn test_phase_mismatch() {
    let work = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Bytecode);

    // Expected at parse time but only thrown at runtime.
    let expected = negative(ErrorPhase::Parse);
    let result = compile_and_run(
        "test262::late.js",
        "THROW;",
        StrictMode::NonStrictOnly,
        &work.path().join("late"),
        Some(&expected),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::CompileFailed);

    // Expected at runtime but rejected by the compiler.
    let expected = negative(ErrorPhase::Runtime);
    let result = compile_and_run(
        "test262::early.js",
        "SYNTAX_ERROR",
        StrictMode::NonStrictOnly,
        &work.path().join("early"),
        Some(&expected),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::CompileFailed);
    assert!(result.output.as_deref().unwrap_or_default().contains("SyntaxError"));
}

#[tokio::test]
async fn test_execution_timeout() {
    let work = tempfile::tempdir().unwrap();
    let mut opts = exec_options(ExecMode::Bytecode);
    opts.timeout = Duration::from_secs(1);

    let result = compile_and_run(
        "cves::hang.js",
        "HANG",
        StrictMode::NonStrictOnly,
        &work.path().join("hang"),
        None,
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::ExecuteTimeout);
    assert_eq!(result.msg, "Execution timed out (non-strict)");
}

#[tokio::test]
async fn test_engine_environment() {
    let work = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Bytecode);

    let result = compile_and_run(
        "cves::env.js",
        "CHECK_ENV",
        StrictMode::Both,
        &work.path().join("env"),
        None,
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::TestPassed, "{result:?}");
}

#[tokio::test]
async fn test_lazy_mode_reports_parse_errors_at_run_time() {
    let work = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Lazy);
    let expected = negative(ErrorPhase::Early);

    let result = compile_and_run(
        "test262::lazy.js",
        "SYNTAX_ERROR",
        StrictMode::Both,
        &work.path().join("lazy"),
        Some(&expected),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::TestPassed);
    assert!(!work.path().join("lazy.strict.js.hbc").exists());

    let result = compile_and_run(
        "cves::lazy-throw.js",
        "THROW;",
        StrictMode::NonStrictOnly,
        &work.path().join("lazy-throw"),
        None,
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::ExecuteFailed);
}

#[tokio::test]
async fn test_probe_features() {
    let features = probe_features(engine_dir()).await;
    assert!(features.contains("Atomics"));
    assert!(features.contains("Zip file input"));
    assert_eq!(features.len(), 2);
}

#[tokio::test]
async fn test_ast_tree_fixture_match() {
    let dir = tempfile::tempdir().unwrap();
    let test = write(dir.path(), "esprima/test_fixtures/ident.js", "IDENTIFIER");
    write(
        dir.path(),
        "esprima/test_fixtures/ident.tree.json",
        r#"{"type":"Program","sourceType":"script","body":[{"type":"ExpressionStatement","expression":{"type":"Identifier","name":"x"}}]}"#,
    );
    let opts = exec_options(ExecMode::Bytecode);

    let result = run_ast_test(
        "esprima::ident.js",
        SuiteKind::Esprima,
        &test,
        &dir.path().join("ident"),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::TestPassed, "{result:?}");
}

#[tokio::test]
async fn test_ast_tree_fixture_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let test = write(dir.path(), "esprima/test_fixtures/empty.js", "");
    write(
        dir.path(),
        "esprima/test_fixtures/empty.tree.json",
        r#"{"type":"Program","body":[{"type":"EmptyStatement"}]}"#,
    );
    let opts = exec_options(ExecMode::Bytecode);

    let result = run_ast_test(
        "esprima::empty.js",
        SuiteKind::Esprima,
        &test,
        &dir.path().join("empty"),
        &opts,
    )
    .await;
    assert_eq!(result.code, TestResultCode::TestFailed);
}

#[tokio::test]
async fn test_ast_expected_failures() {
    let dir = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Bytecode);

    // Tree fixture with recorded errors, but the parser accepts the input.
    let test = write(dir.path(), "esprima/test_fixtures/lenient.js", "var a;");
    write(
        dir.path(),
        "esprima/test_fixtures/lenient.tree.json",
        r#"{"type":"Program","body":[],"errors":[{"message":"bad"}]}"#,
    );
    let result = run_ast_test("esprima::lenient.js", SuiteKind::Esprima, &test, &dir.path().join("lenient"), &opts).await;
    assert_eq!(result.code, TestResultCode::TestFailed);
    assert_eq!(result.msg, "test is expected to fail");

    let test = write(dir.path(), "esprima/test_fixtures/broken.js", "SYNTAX_ERROR");
    write(dir.path(), "esprima/test_fixtures/broken.failure.json", r#"{"message":"Unexpected token"}"#);
    let result = run_ast_test("esprima::broken.js", SuiteKind::Esprima, &test, &dir.path().join("broken"), &opts).await;
    assert_eq!(result.code, TestResultCode::TestPassed);

    // Only semantic validation rejects this one.
    let test = write(dir.path(), "esprima/test_fixtures/semantic.js", "SEMANTIC_ERROR");
    write(dir.path(), "esprima/test_fixtures/semantic.failure.json", r#"{"message":"Invalid"}"#);
    let result = run_ast_test("esprima::semantic.js", SuiteKind::Esprima, &test, &dir.path().join("semantic"), &opts).await;
    assert_eq!(result.code, TestResultCode::TestPassed);
}

#[tokio::test]
async fn test_ast_source_wrapper_and_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let opts = exec_options(ExecMode::Bytecode);

    let test = write(
        dir.path(),
        "esprima/test_fixtures/wrapped.source.js",
        "var source = \"SYNTAX_ERROR\";\n",
    );
    write(dir.path(), "esprima/test_fixtures/wrapped.failure.json", r#"{"message":"Unexpected"}"#);
    let stem = dir.path().join("work/wrapped");
    std::fs::create_dir_all(stem.parent().unwrap()).unwrap();
    let result = run_ast_test("esprima::wrapped.source.js", SuiteKind::Esprima, &test, &stem, &opts).await;
    assert_eq!(result.code, TestResultCode::TestPassed, "{result:?}");
    let input = std::fs::read_to_string(dir.path().join("work/wrapped.input.js")).unwrap();
    assert_eq!(input, "SYNTAX_ERROR");

    let test = write(dir.path(), "esprima/test_fixtures/tokens.js", "a");
    write(dir.path(), "esprima/test_fixtures/tokens.tokens.json", "[]");
    let result = run_ast_test("esprima::tokens.js", SuiteKind::Esprima, &test, &dir.path().join("tokens"), &opts).await;
    assert_eq!(result.code, TestResultCode::TestSkipped);
}
