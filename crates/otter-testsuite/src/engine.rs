//! Execution adapter for the external engine binaries.
//!
//! Every subprocess outcome (non-zero exit, timeout, spawn failure) is
//! turned into a [`TestCaseResult`] here. Nothing below this module ever
//! surfaces a per-test error to the scheduler.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, TestsuiteError};
use crate::frontmatter::{ErrorPhase, ExpectedFailure};
use crate::preprocess::{StrictMode, Variant};
use crate::result::{TestCaseResult, TestResultCode};

/// Compiler, lazy runner, AST dumper and feature probe
pub const COMPILER_BINARY: &str = "hermes";
/// Bytecode VM
pub const VM_BINARY: &str = "hvm";
/// Alternate native compiler
pub const NATIVE_COMPILER_BINARY: &str = "shermes";

const COMPILER_FLAGS: [&str; 2] = ["-hermes-parser", "-Xhermes-internal-test-methods"];
const VM_FLAGS: [&str; 2] = ["-Xhermes-internal-test-methods", "-Xmicrotask-queue"];
const DISABLE_HANDLE_SAN_FLAG: &str = "-gc-sanitize-handles=0";
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// How compiled code gets executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Compile to bytecode, then run it in the VM
    Bytecode,
    /// Skip compilation and evaluate the source lazily
    Lazy,
    /// Compile to a native executable with the alternate compiler
    Native,
}

/// Extra flags forwarded verbatim to the engine
#[derive(Debug, Clone, Default)]
pub struct ExtraArgs {
    pub compile_args: Vec<String>,
    pub vm_args: Vec<String>,
}

/// Per-test execution settings
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub binary_dir: PathBuf,
    pub mode: ExecMode,
    pub optimize: bool,
    pub extra_args: ExtraArgs,
    /// Applies to each phase separately
    pub timeout: Duration,
    pub disable_handle_san: bool,
}

impl ExecOptions {
    pub fn binary(&self, name: &str) -> PathBuf {
        self.binary_dir.join(name)
    }
}

/// Make sure the binaries needed for `mode` exist in `binary_dir`.
pub fn check_binaries(binary_dir: &Path, mode: ExecMode) -> Result<()> {
    let required: &[&str] = match mode {
        ExecMode::Bytecode => &[COMPILER_BINARY, VM_BINARY],
        ExecMode::Lazy => &[COMPILER_BINARY],
        ExecMode::Native => &[COMPILER_BINARY, NATIVE_COMPILER_BINARY],
    };
    for name in required {
        let path = binary_dir.join(name);
        if !path.is_file() {
            return Err(TestsuiteError::MissingBinary(path));
        }
    }
    Ok(())
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub(crate) struct ProcessOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(stderr);
        }
        out
    }
}

#[derive(Debug)]
pub(crate) enum ProcessError {
    Timeout,
    Spawn(std::io::Error),
}

/// Run `program` to completion, killing it if `timeout` elapses.
pub(crate) async fn run_process(
    program: &Path,
    args: &[OsString],
    envs: &[(&str, OsString)],
    timeout: Duration,
) -> std::result::Result<ProcessOutput, ProcessError> {
    debug!(program = %program.display(), ?args, "spawning");
    let child = Command::new(program)
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ProcessError::Spawn)?;

    // Dropping the pending wait on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(ProcessError::Spawn(e)),
        Err(_) => Err(ProcessError::Timeout),
    }
}

fn engine_env(binary_dir: &Path) -> Vec<(&'static str, OsString)> {
    let mut env = vec![("LC_ALL", OsString::from("en_US.UTF-8"))];
    if cfg!(target_os = "linux") {
        env.push(("ICU_DATA", binary_dir.as_os_str().to_os_string()));
    }
    env
}

/// Ask the engine which optional features it was built with.
///
/// Looks for a `Features:` line in `hermes --version` output and collects
/// every following non-empty line. Probe failures yield an empty set.
pub async fn probe_features(binary_dir: &Path) -> HashSet<String> {
    let program = binary_dir.join(COMPILER_BINARY);
    match run_process(&program, &["--version".into()], &[], PROBE_TIMEOUT).await {
        Ok(out) if out.success => parse_feature_list(&out.stdout),
        Ok(out) => {
            warn!(stderr = %out.stderr.trim(), "feature probe exited with an error");
            HashSet::new()
        }
        Err(e) => {
            warn!(?e, "feature probe failed");
            HashSet::new()
        }
    }
}

pub(crate) fn parse_feature_list(version_output: &str) -> HashSet<String> {
    version_output
        .lines()
        .skip_while(|line| line.trim() != "Features:")
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Outcome of a single variant
enum VariantOutcome {
    Passed,
    Failed(TestCaseResult),
}

/// Compile and run every variant of a test.
///
/// Variant sources are written next to `work_stem` as
/// `<stem>.<variant>.js`. The test passes only if every variant passes; the
/// first failing variant decides the reported code and message.
pub async fn compile_and_run(
    test_name: &str,
    source: &str,
    strict_mode: StrictMode,
    work_stem: &Path,
    expected_failure: Option<&ExpectedFailure>,
    opts: &ExecOptions,
) -> TestCaseResult {
    for &variant in strict_mode.variants() {
        let src_path = with_suffix(work_stem, &format!("{}.js", variant_tag(variant)));
        if let Err(e) = tokio::fs::write(&src_path, variant.apply(source)).await {
            return TestCaseResult::new(
                test_name,
                TestResultCode::TestFailed,
                format!("Failed to write {}: {e}", src_path.display()),
            );
        }
        debug!(test = test_name, %variant, path = %src_path.display(), "running variant");

        match run_variant(test_name, variant, &src_path, expected_failure, opts).await {
            VariantOutcome::Passed => {}
            VariantOutcome::Failed(result) => return result,
        }
    }
    TestCaseResult::passed(test_name)
}

async fn run_variant(
    test_name: &str,
    variant: Variant,
    src_path: &Path,
    expected_failure: Option<&ExpectedFailure>,
    opts: &ExecOptions,
) -> VariantOutcome {
    let phase = expected_failure.map(|e| e.phase);
    let expect_compile_error = phase.is_some_and(ErrorPhase::is_compile_time);
    let fail = |code, msg: String, output: Option<String>| {
        let result = TestCaseResult::new(test_name, code, format!("{msg} ({variant})"));
        VariantOutcome::Failed(match output {
            Some(output) => result.with_output(output),
            None => result,
        })
    };

    let (program, args) = match opts.mode {
        ExecMode::Lazy => {
            // Lazy mode parses and runs in one step, so compile-time errors
            // surface as a failing run.
            let mut args: Vec<OsString> = vec!["-lazy".into()];
            if !variant.is_strict() {
                args.push("-non-strict".into());
            }
            args.push(src_path.into());
            args.extend(vm_args(opts));
            (opts.binary(COMPILER_BINARY), args)
        }
        ExecMode::Bytecode | ExecMode::Native => {
            let artifact = with_suffix(
                src_path,
                if opts.mode == ExecMode::Native { "exe" } else { "hbc" },
            );
            let (compiler, args) = compile_command(src_path, &artifact, variant, opts);
            match run_process(&compiler, &args, &[], opts.timeout).await {
                Err(ProcessError::Timeout) => {
                    return fail(
                        TestResultCode::CompileTimeout,
                        "Compilation timed out".into(),
                        None,
                    );
                }
                Err(ProcessError::Spawn(e)) => {
                    return fail(
                        TestResultCode::CompileFailed,
                        format!("Failed to run compiler: {e}"),
                        None,
                    );
                }
                Ok(out) if !out.success => {
                    if expect_compile_error {
                        debug!(test = test_name, %variant, "compiler failed as expected");
                        return VariantOutcome::Passed;
                    }
                    return fail(
                        TestResultCode::CompileFailed,
                        "Compilation failed".into(),
                        Some(out.combined()),
                    );
                }
                Ok(_) if expect_compile_error => {
                    return fail(
                        TestResultCode::CompileFailed,
                        "Compilation failure expected".into(),
                        None,
                    );
                }
                Ok(_) => {}
            }

            if opts.mode == ExecMode::Native {
                let args = opts.extra_args.vm_args.iter().map(OsString::from).collect();
                (artifact, args)
            } else {
                let mut args: Vec<OsString> = vec![artifact.into()];
                args.extend(vm_args(opts));
                (opts.binary(VM_BINARY), args)
            }
        }
    };

    let expect_run_error = match phase {
        Some(ErrorPhase::Runtime | ErrorPhase::Resolution) => true,
        Some(ErrorPhase::Parse | ErrorPhase::Early) => opts.mode == ExecMode::Lazy,
        None => false,
    };
    match run_process(&program, &args, &engine_env(&opts.binary_dir), opts.timeout).await {
        Err(ProcessError::Timeout) => fail(
            TestResultCode::ExecuteTimeout,
            "Execution timed out".into(),
            None,
        ),
        Err(ProcessError::Spawn(e)) => fail(
            TestResultCode::ExecuteFailed,
            format!("Failed to run {}: {e}", program.display()),
            None,
        ),
        Ok(out) if !out.success => {
            if expect_run_error {
                debug!(test = test_name, %variant, "execution threw as expected");
                VariantOutcome::Passed
            } else {
                fail(
                    TestResultCode::ExecuteFailed,
                    "Execution threw unexpected error".into(),
                    Some(out.combined()),
                )
            }
        }
        Ok(out) if expect_run_error => fail(
            TestResultCode::ExecuteFailed,
            "Expected execution to throw".into(),
            Some(out.combined()),
        ),
        Ok(_) => VariantOutcome::Passed,
    }
}

fn compile_command(
    src_path: &Path,
    artifact: &Path,
    variant: Variant,
    opts: &ExecOptions,
) -> (PathBuf, Vec<OsString>) {
    let mut args: Vec<OsString> = vec![src_path.into()];
    let compiler = if opts.mode == ExecMode::Native {
        args.extend(["-o".into(), artifact.into()]);
        opts.binary(NATIVE_COMPILER_BINARY)
    } else {
        args.extend(COMPILER_FLAGS.iter().map(OsString::from));
        args.extend(["-emit-binary".into(), "-out".into(), artifact.into()]);
        opts.binary(COMPILER_BINARY)
    };
    if opts.optimize {
        args.push("-O".into());
    }
    if !variant.is_strict() {
        args.push("-non-strict".into());
    }
    args.extend(opts.extra_args.compile_args.iter().map(OsString::from));
    (compiler, args)
}

fn vm_args(opts: &ExecOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = VM_FLAGS.iter().map(OsString::from).collect();
    if opts.disable_handle_san {
        args.push(DISABLE_HANDLE_SAN_FLAG.into());
    }
    args.extend(opts.extra_args.vm_args.iter().map(OsString::from));
    args
}

fn variant_tag(variant: Variant) -> &'static str {
    match variant {
        Variant::Strict => "strict",
        Variant::NonStrict => "sloppy",
    }
}

/// `foo/bar` + `js` → `foo/bar.js`, keeping any dots already in the name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
