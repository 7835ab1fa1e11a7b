//! Test result codes and per-test results

use serde::{Deserialize, Serialize};

/// Terminal state of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResultCode {
    /// Every required variant passed
    TestPassed,
    /// Failure that is not attributable to a compile or execute phase
    TestFailed,
    /// Skipped by the skip list or an unsupported feature/flag
    TestSkipped,
    /// Skipped by a permanent skip category; never run
    TestPermanentlySkipped,
    /// Skip-listed test that passed when run anyway
    TestUnexpectedPassed,
    /// Compiler failed when it should have succeeded, or vice versa
    CompileFailed,
    /// Compiler timed out
    CompileTimeout,
    /// Execution failed when it should have succeeded, or vice versa
    ExecuteFailed,
    /// Execution timed out
    ExecuteTimeout,
}

impl TestResultCode {
    pub const ALL: [TestResultCode; 9] = [
        TestResultCode::TestPassed,
        TestResultCode::TestFailed,
        TestResultCode::TestSkipped,
        TestResultCode::TestPermanentlySkipped,
        TestResultCode::TestUnexpectedPassed,
        TestResultCode::CompileFailed,
        TestResultCode::CompileTimeout,
        TestResultCode::ExecuteFailed,
        TestResultCode::ExecuteTimeout,
    ];

    /// Whether this code counts against the run.
    pub fn is_failure(self) -> bool {
        !matches!(
            self,
            TestResultCode::TestPassed
                | TestResultCode::TestSkipped
                | TestResultCode::TestPermanentlySkipped
        )
    }

    /// Whether the test was never executed.
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            TestResultCode::TestSkipped | TestResultCode::TestPermanentlySkipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestResultCode::TestPassed => "TEST_PASSED",
            TestResultCode::TestFailed => "TEST_FAILED",
            TestResultCode::TestSkipped => "TEST_SKIPPED",
            TestResultCode::TestPermanentlySkipped => "TEST_PERMANENTLY_SKIPPED",
            TestResultCode::TestUnexpectedPassed => "TEST_UNEXPECTED_PASSED",
            TestResultCode::CompileFailed => "COMPILE_FAILED",
            TestResultCode::CompileTimeout => "COMPILE_TIMEOUT",
            TestResultCode::ExecuteFailed => "EXECUTE_FAILED",
            TestResultCode::ExecuteTimeout => "EXECUTE_TIMEOUT",
        }
    }
}

impl std::fmt::Display for TestResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running (or skipping) a single test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// Full test name, `{suite}::{relative path}`
    pub test_name: String,
    pub code: TestResultCode,
    /// Short human-readable reason
    pub msg: String,
    /// Captured engine output, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl TestCaseResult {
    pub fn new(test_name: impl Into<String>, code: TestResultCode, msg: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            code,
            msg: msg.into(),
            output: None,
        }
    }

    pub fn passed(test_name: impl Into<String>) -> Self {
        Self::new(test_name, TestResultCode::TestPassed, "")
    }

    pub fn skipped(test_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(test_name, TestResultCode::TestSkipped, msg)
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.trim().is_empty() {
            self.output = Some(output);
        }
        self
    }
}
