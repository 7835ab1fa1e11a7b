//! AST-check suites (esprima, flow).
//!
//! The engine dumps its AST as JSON, which is compared structurally against
//! an ESTree fixture after both sides are normalized into a common dialect.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::engine::{COMPILER_BINARY, ExecOptions, ProcessError, ProcessOutput, run_process, with_suffix};
use crate::result::{TestCaseResult, TestResultCode};
use crate::suite::SuiteKind;

/// Kind of expected-output file next to an AST test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureKind {
    /// Golden AST
    Tree,
    /// Parser must reject the input
    Failure,
    /// Token dump, which the engine cannot produce
    Tokens,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub kind: FixtureKind,
    pub path: PathBuf,
}

/// Find the fixture belonging to `test_file`.
///
/// `foo.source.js` and `foo.js` both look for `foo.tree.json`, then
/// `foo.failure.json`, then `foo.tokens.json`.
pub fn find_fixture(test_file: &Path) -> Option<Fixture> {
    let path = test_file.to_string_lossy();
    let stem = path
        .strip_suffix(".source.js")
        .or_else(|| path.strip_suffix(".js"))?;
    [
        (FixtureKind::Tree, "tree.json"),
        (FixtureKind::Failure, "failure.json"),
        (FixtureKind::Tokens, "tokens.json"),
    ]
    .into_iter()
    .map(|(kind, suffix)| Fixture {
        kind,
        path: PathBuf::from(format!("{stem}.{suffix}")),
    })
    .find(|fixture| fixture.path.is_file())
}

fn is_source_wrapper(test_file: &Path) -> bool {
    test_file.to_string_lossy().ends_with(".source.js")
}

/// Parser flags for a suite and file.
fn parse_flags(kind: SuiteKind, test_file: &Path, transformed: bool) -> Vec<OsString> {
    let mut flags: Vec<OsString> = vec!["-hermes-parser".into()];
    if kind == SuiteKind::Flow {
        flags.extend(["-parse-flow", "-parse-jsx", "-Xinclude-empty-ast-nodes"].map(OsString::from));
    } else if test_file.to_string_lossy().contains("JSX") {
        flags.push("-parse-jsx".into());
    }
    let dump = if transformed {
        "-dump-transformed-ast"
    } else {
        "-dump-ast"
    };
    flags.push(dump.into());
    flags
}

/// Dump the AST of `input`. `transformed` additionally runs semantic
/// validation.
pub(crate) async fn generate_ast(
    kind: SuiteKind,
    test_file: &Path,
    input: &Path,
    transformed: bool,
    opts: &ExecOptions,
) -> Result<ProcessOutput, ProcessError> {
    let mut args = parse_flags(kind, test_file, transformed);
    args.push(input.into());
    run_process(&opts.binary(COMPILER_BINARY), &args, &[], opts.timeout).await
}

/// `.source.js` files hold `var source = "...";`. Evaluate them and write
/// the printed source to a file the parser can read.
async fn resolve_input(
    test_name: &str,
    test_file: &Path,
    work_stem: &Path,
    opts: &ExecOptions,
) -> Result<PathBuf, TestCaseResult> {
    if !is_source_wrapper(test_file) {
        return Ok(test_file.to_path_buf());
    }
    let fail = |code, msg: String| TestCaseResult::new(test_name, code, msg);

    let content = tokio::fs::read_to_string(test_file)
        .await
        .map_err(|e| fail(TestResultCode::TestFailed, format!("Failed to read test: {e}")))?;
    let eval_path = with_suffix(work_stem, "eval.js");
    tokio::fs::write(&eval_path, format!("{content}\nprint(source);"))
        .await
        .map_err(|e| fail(TestResultCode::TestFailed, format!("Failed to write {}: {e}", eval_path.display())))?;

    let out = match run_process(
        &opts.binary(COMPILER_BINARY),
        &[eval_path.into()],
        &[],
        opts.timeout,
    )
    .await
    {
        Ok(out) if out.success => out,
        Ok(out) => {
            return Err(fail(TestResultCode::TestFailed, "Failed to evaluate source".into())
                .with_output(out.combined()));
        }
        Err(ProcessError::Timeout) => {
            return Err(fail(TestResultCode::CompileTimeout, "Source evaluation timed out".into()));
        }
        Err(ProcessError::Spawn(e)) => {
            return Err(fail(TestResultCode::CompileFailed, format!("Failed to run evaluator: {e}")));
        }
    };

    let input = with_suffix(work_stem, "input.js");
    tokio::fs::write(&input, out.stdout.trim())
        .await
        .map_err(|e| fail(TestResultCode::TestFailed, format!("Failed to write {}: {e}", input.display())))?;
    Ok(input)
}

/// Run an esprima or flow test and judge it against its fixture.
pub async fn run_ast_test(
    test_name: &str,
    kind: SuiteKind,
    test_file: &Path,
    work_stem: &Path,
    opts: &ExecOptions,
) -> TestCaseResult {
    let Some(fixture) = find_fixture(test_file) else {
        return TestCaseResult::new(test_name, TestResultCode::TestFailed, "No expected fixture found");
    };
    if fixture.kind == FixtureKind::Tokens {
        return TestCaseResult::skipped(test_name, "Skipping unsupported tokens test");
    }

    let expected = if fixture.kind == FixtureKind::Tree {
        match tokio::fs::read_to_string(&fixture.path).await {
            Ok(expected) => Some(expected),
            Err(e) => {
                return TestCaseResult::new(
                    test_name,
                    TestResultCode::TestFailed,
                    format!("Failed to read fixture {}: {e}", fixture.path.display()),
                );
            }
        }
    } else {
        None
    };
    // A tree fixture with recorded errors still expects the parser to fail.
    let expect_failure = expected.as_ref().is_none_or(|tree| tree.contains("\"errors\":"));

    let input = match resolve_input(test_name, test_file, work_stem, opts).await {
        Ok(input) => input,
        Err(result) => return result,
    };

    let dump = |transformed| generate_ast(kind, test_file, &input, transformed, opts);
    let mut out = match dump(false).await {
        Ok(out) => out,
        Err(e) => return dump_error(test_name, e),
    };

    if expect_failure {
        if out.success {
            // Some errors are only reported by semantic validation.
            debug!(test = test_name, "retrying with semantic validation");
            out = match dump(true).await {
                Ok(out) => out,
                Err(e) => return dump_error(test_name, e),
            };
        }
        return if out.success {
            TestCaseResult::new(test_name, TestResultCode::TestFailed, "test is expected to fail")
        } else {
            TestCaseResult::passed(test_name)
        };
    }

    if !out.success {
        return TestCaseResult::new(test_name, TestResultCode::CompileFailed, "AST dump failed")
            .with_output(out.combined());
    }
    let expected = expected.unwrap_or_default();
    diff_ast_output(test_name, &out.stdout, &expected)
}

fn dump_error(test_name: &str, error: ProcessError) -> TestCaseResult {
    match error {
        ProcessError::Timeout => {
            TestCaseResult::new(test_name, TestResultCode::CompileTimeout, "AST dump timed out")
        }
        ProcessError::Spawn(e) => TestCaseResult::new(
            test_name,
            TestResultCode::CompileFailed,
            format!("Failed to run parser: {e}"),
        ),
    }
}

/// Compare the engine's AST JSON with the fixture JSON.
pub fn diff_ast_output(test_name: &str, output: &str, expected: &str) -> TestCaseResult {
    let parse = |text: &str| serde_json::from_str::<Value>(text);
    let (engine, fixture) = match (parse(output), parse(expected)) {
        (Ok(engine), Ok(fixture)) => (engine, fixture),
        (Err(e), _) | (_, Err(e)) => {
            return TestCaseResult::new(
                test_name,
                TestResultCode::TestFailed,
                format!("json decode error: {e}"),
            );
        }
    };
    match compare_nodes(engine, fixture) {
        Ok(()) => TestCaseResult::passed(test_name),
        Err(mismatch) => {
            TestCaseResult::new(test_name, TestResultCode::TestFailed, "ast not expected")
                .with_output(mismatch)
        }
    }
}

const COMMON_FIXTURE_OMITTED_KEYS: [&str; 3] = ["loc", "range", "errors"];

fn engine_omits(node_type: &str, key: &str) -> bool {
    let keys: &[&str] = match node_type {
        "ImportDeclaration" => &["importKind", "assertions"],
        "ImportSpecifier" => &["importKind"],
        "ExportNamedDeclaration" | "ExportAllDeclaration" => &["exportKind"],
        "ArrayExpression" => &["trailingComma"],
        "ObjectTypeAnnotation" => &["inexact"],
        "ForOfStatement" => &["await"],
        "EnumStringBody" | "EnumNumberBody" | "EnumBooleanBody" | "EnumSymbolBody" => {
            &["hasUnknownMembers"]
        }
        "Literal" => &["raw"],
        _ => &[],
    };
    keys.contains(&key)
}

fn fixture_omits(node_type: &str, key: &str) -> bool {
    if COMMON_FIXTURE_OMITTED_KEYS.contains(&key) {
        return true;
    }
    let keys: &[&str] = match node_type {
        "Program" => &["tokens", "sourceType", "comments"],
        "Literal" => &["raw"],
        "BigIntLiteral" | "BigIntLiteralTypeAnnotation" => &["value"],
        "ImportDeclaration" => &["importKind", "attributes"],
        "ImportSpecifier" => &["importKind"],
        "ExportNamedDeclaration" | "ExportAllDeclaration" | "ExportDefaultDeclaration" => {
            &["exportKind"]
        }
        "FunctionDeclaration" | "FunctionExpression" => &["expression", "predicate"],
        "ArrowFunctionExpression" => &["generator"],
        "ForInStatement" => &["each"],
        "ForOfStatement" => &["await"],
        "Identifier" => &["optional"],
        "MethodDefinition" => &["decorators"],
        "ObjectTypeAnnotation" => &["inexact"],
        _ => &[],
    };
    keys.contains(&key)
}

fn node_type(node: &Map<String, Value>) -> Option<&str> {
    node.get("type").and_then(Value::as_str)
}

/// Bring one engine node into ESTree form. Children are left alone.
fn normalize_engine_node(node: Value) -> Value {
    let Value::Object(mut map) = node else {
        return node;
    };
    match node_type(&map).map(str::to_string).as_deref() {
        None => return Value::Object(map),
        Some("Empty") => return Value::Null,
        Some("File") => match map.remove("program") {
            Some(Value::Object(program)) => map = program,
            Some(other) => return other,
            None => return Value::Object(map),
        },
        Some(_) => {}
    }

    let ty = node_type(&map).unwrap_or_default().to_string();
    match ty.as_str() {
        "ExpressionStatement" => {
            let is_use_strict = map.get("expression").is_some_and(|expr| {
                expr.get("type").and_then(Value::as_str) == Some("StringLiteral")
                    && expr.get("value").and_then(Value::as_str) == Some("use strict")
            });
            if is_use_strict {
                map.insert("directive".into(), "use strict".into());
            } else {
                map.remove("directive");
            }
        }
        "Identifier" if map.get("name").and_then(Value::as_str) == Some("this") => {
            map.remove("optional");
        }
        "ClassProperty" | "ClassPrivateProperty" => {
            let optional = map.get("optional").is_some_and(|v| v.as_bool() == Some(true));
            if !optional {
                map.remove("optional");
            }
        }
        _ => {}
    }

    if matches!(
        ty.as_str(),
        "NullLiteral"
            | "BooleanLiteral"
            | "StringLiteral"
            | "NumericLiteral"
            | "RegExpLiteral"
            | "JSXStringLiteral"
    ) {
        if ty == "NullLiteral" {
            map.insert("value".into(), Value::Null);
        }
        if ty == "RegExpLiteral" {
            let pattern = map.remove("pattern").unwrap_or(Value::Null);
            let flags = map.remove("flags").unwrap_or(Value::Null);
            let mut regex = Map::new();
            regex.insert("pattern".into(), pattern);
            regex.insert("flags".into(), flags);
            map.insert("regex".into(), Value::Object(regex));
        }
        map.insert("type".into(), "Literal".into());
    }
    Value::Object(map)
}

/// Bring one fixture node into the shared dialect. Children are left alone.
fn normalize_fixture_node(node: Value) -> Value {
    let Value::Object(mut map) = node else {
        return node;
    };
    let Some(ty) = node_type(&map).map(str::to_string) else {
        return Value::Object(map);
    };
    match ty.as_str() {
        "ExpressionStatement" => {
            if map
                .get("directive")
                .is_some_and(|d| d.as_str() != Some("use strict"))
            {
                map.remove("directive");
            }
        }
        "Literal" if map.contains_key("regex") => {
            map.remove("value");
        }
        "RestProperty" => {
            map.insert("type".into(), "RestElement".into());
        }
        "SpreadProperty" => {
            map.insert("type".into(), "SpreadElement".into());
        }
        "ClassProperty" | "ClassPrivateProperty" => {
            map.entry("declare").or_insert(Value::Bool(false));
        }
        "TemplateLiteral" => {
            if let Some(Value::Array(quasis)) = map.get_mut("quasis") {
                for quasi in quasis.iter_mut().filter_map(Value::as_object_mut) {
                    if let Some(Value::Object(mut value)) = quasi.remove("value") {
                        for key in ["cooked", "raw"] {
                            quasi.insert(key.into(), value.remove(key).unwrap_or(Value::Null));
                        }
                    }
                }
            }
        }
        _ => {}
    }
    Value::Object(map)
}

/// Structural comparison of an engine AST against a fixture AST.
///
/// On mismatch, returns a short description of the first difference.
pub fn compare_nodes(engine: Value, fixture: Value) -> Result<(), String> {
    let engine = normalize_engine_node(engine);
    let fixture = normalize_fixture_node(fixture);

    match (engine, fixture) {
        (Value::Object(mut engine), Value::Object(fixture)) => {
            let engine_ty = node_type(&engine).unwrap_or_default().to_string();
            let fixture_ty = node_type(&fixture).unwrap_or_default().to_string();

            // Extra engine keys are fine as long as they carry no value.
            for (key, val) in &engine {
                if engine_omits(&engine_ty, key) {
                    continue;
                }
                if !fixture.contains_key(key) && !val.is_null() {
                    return Err(format!("{engine_ty} extra property: {key}"));
                }
            }
            for (key, val) in fixture {
                if fixture_omits(&fixture_ty, &key) {
                    continue;
                }
                let Some(actual) = engine.remove(&key) else {
                    return Err(format!("{engine_ty} missing property: {key}"));
                };
                compare_nodes(actual, val)?;
            }
            Ok(())
        }
        (Value::Array(engine), Value::Array(fixture)) => {
            if engine.len() != fixture.len() {
                return Err(format!(
                    "List expected {} elements, found {}",
                    fixture.len(),
                    engine.len()
                ));
            }
            engine
                .into_iter()
                .zip(fixture)
                .try_for_each(|(a, b)| compare_nodes(a, b))
        }
        (engine, fixture) if engine == fixture => Ok(()),
        (engine, fixture) => Err(format!("Expected {fixture}, found {engine}")),
    }
}
