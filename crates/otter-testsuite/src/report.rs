//! Test result reporting

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::result::{TestCaseResult, TestResultCode};

/// The `limit` longest-running tests, longest first
#[derive(Debug, Clone, Default)]
pub struct SlowestTests {
    limit: usize,
    entries: Vec<(String, Duration)>,
}

impl SlowestTests {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: Vec::with_capacity(limit + 1),
        }
    }

    /// Insert at the sorted position, then drop whatever falls off the end.
    pub fn record(&mut self, test_name: &str, duration: Duration) {
        if self.limit == 0 {
            return;
        }
        if self.entries.len() == self.limit
            && self.entries.last().is_some_and(|(_, d)| *d >= duration)
        {
            return;
        }
        let pos = self.entries.partition_point(|(_, d)| *d >= duration);
        self.entries.insert(pos, (test_name.to_string(), duration));
        self.entries.truncate(self.limit);
    }

    pub fn entries(&self) -> &[(String, Duration)] {
        &self.entries
    }
}

/// Aggregated state of a run, updated as results arrive
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Result count per code
    pub histogram: BTreeMap<TestResultCode, usize>,
    /// Failed results grouped by code, in arrival order
    pub failures: BTreeMap<TestResultCode, Vec<TestCaseResult>>,
    pub slowest: SlowestTests,
    /// Tests never started because of fail-fast
    pub not_started: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(show_slowest: usize) -> Self {
        Self {
            histogram: BTreeMap::new(),
            failures: BTreeMap::new(),
            slowest: SlowestTests::new(show_slowest),
            not_started: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Record a resolved test. `duration` is present for tests that ran.
    pub fn record(&mut self, result: TestCaseResult, duration: Option<Duration>) {
        *self.histogram.entry(result.code).or_default() += 1;
        if let Some(duration) = duration {
            self.slowest.record(&result.test_name, duration);
        }
        if result.code.is_failure() {
            self.failures.entry(result.code).or_default().push(result);
        }
    }

    pub fn count(&self, code: TestResultCode) -> usize {
        self.histogram.get(&code).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.histogram.values().sum()
    }

    pub fn failed(&self) -> usize {
        self.histogram
            .iter()
            .filter(|(code, _)| code.is_failure())
            .map(|(_, n)| n)
            .sum()
    }

    /// Tests that were actually run (not skipped in any way).
    pub fn executed(&self) -> usize {
        self.total()
            - self.count(TestResultCode::TestSkipped)
            - self.count(TestResultCode::TestPermanentlySkipped)
    }

    /// Pass rate in percent over executed tests, `None` if nothing ran.
    pub fn pass_rate(&self) -> Option<f64> {
        let executed = self.executed();
        (executed > 0)
            .then(|| self.count(TestResultCode::TestPassed) as f64 / executed as f64 * 100.0)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Print the results table to stdout
    pub fn print_summary(&self) {
        let status = if self.has_failures() {
            "FAIL".red().bold()
        } else {
            "PASS".green().bold()
        };
        let pass_rate = self
            .pass_rate()
            .map_or_else(|| "--".to_string(), |rate| format!("{rate:.2}%"));
        let row = |label: &str, value: String| println!("| {label:<20} | {value:>8} |");

        println!("Testing time: {:.2}", self.elapsed.as_secs_f64());
        println!("-----------------------------------");
        println!("| {:<20} |   {}   |", "Results", status);
        println!("|----------------------+----------|");
        row("Total", self.total().to_string());
        row("Passes", self.count(TestResultCode::TestPassed).to_string());
        row("Failures", self.failed().to_string());
        row("Skipped", self.count(TestResultCode::TestSkipped).to_string());
        row(
            "Permanently Skipped",
            self.count(TestResultCode::TestPermanentlySkipped).to_string(),
        );
        row(
            "Unexpected passes",
            self.count(TestResultCode::TestUnexpectedPassed).to_string(),
        );
        row("Pass Rate", pass_rate);
        println!("-----------------------------------");
        println!("| {:<20} |          |", "Failures");
        println!("|----------------------+----------|");
        for (code, label) in FAILURE_LABELS {
            row(label, self.count(code).to_string());
        }
        println!("-----------------------------------");
        if self.not_started > 0 {
            println!(
                "{} {} tests not started (fail fast)",
                "Note:".yellow().bold(),
                self.not_started
            );
        }
    }

    /// Print failed tests grouped by category, with captured output.
    pub fn print_failures(&self) {
        if self.failures.is_empty() {
            return;
        }
        println!("\n{}", "Details:".bold());
        for (code, label) in FAILURE_LABELS {
            let Some(results) = self.failures.get(&code).filter(|r| !r.is_empty()) else {
                continue;
            };
            println!("-----------------------------------");
            println!("{}:", label.red().bold());
            for result in results {
                println!("{} - {}", result.test_name, result.msg);
                if let Some(output) = &result.output {
                    for line in output.lines() {
                        println!("\t{line}");
                    }
                }
            }
            println!("-----------------------------------");
        }
    }

    pub fn print_slowest(&self) {
        let entries = self.slowest.entries();
        if entries.is_empty() {
            return;
        }
        println!("\n{}", format!("Slowest {} tests:", entries.len()).bold());
        for (name, duration) in entries {
            println!("{:>10.3}s  {name}", duration.as_secs_f64());
        }
    }

    pub fn to_report(&self) -> TestReport {
        TestReport {
            timestamp: Utc::now(),
            total: self.total(),
            passed: self.count(TestResultCode::TestPassed),
            failed: self.failed(),
            skipped: self.count(TestResultCode::TestSkipped),
            permanently_skipped: self.count(TestResultCode::TestPermanentlySkipped),
            not_started: self.not_started,
            pass_rate: self.pass_rate(),
            elapsed_secs: self.elapsed.as_secs_f64(),
            histogram: self.histogram.clone(),
            failures: self.failures.values().flatten().cloned().collect(),
            slowest: self
                .slowest
                .entries()
                .iter()
                .map(|(name, d)| SlowTest {
                    test_name: name.clone(),
                    duration_ms: d.as_millis() as u64,
                })
                .collect(),
        }
    }
}

/// Failure codes in table order
const FAILURE_LABELS: [(TestResultCode, &str); 6] = [
    (TestResultCode::CompileFailed, "Compile fail"),
    (TestResultCode::CompileTimeout, "Compile timeout"),
    (TestResultCode::ExecuteFailed, "Execute fail"),
    (TestResultCode::ExecuteTimeout, "Execute timeout"),
    (TestResultCode::TestUnexpectedPassed, "Unexpected pass"),
    (TestResultCode::TestFailed, "Other"),
];

/// Print tests that passed although a skip list names them.
pub fn print_removal_candidates(candidates: &BTreeMap<String, PathBuf>) {
    println!("\n{}", "Passed tests in skiplist:".bold());
    println!("-----------------------------------");
    for test_name in candidates.keys() {
        println!("{test_name}");
    }
    println!("-----------------------------------");
}

/// Machine-readable run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub permanently_skipped: usize,
    pub not_started: usize,
    /// Percentage of executed tests that passed
    pub pass_rate: Option<f64>,
    pub elapsed_secs: f64,
    pub histogram: BTreeMap<TestResultCode, usize>,
    pub failures: Vec<TestCaseResult>,
    pub slowest: Vec<SlowTest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowTest {
    pub test_name: String,
    pub duration_ms: u64,
}

impl TestReport {
    /// Export to JSON
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut json = self.to_json()?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }
}
