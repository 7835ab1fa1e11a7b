//! Live progress display

use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};

use crate::result::{TestCaseResult, TestResultCode};

/// Progress bar, or one line per result in verbose mode
pub struct TestingProgress {
    pb: Option<ProgressBar>,
    verbose: bool,
    passed: usize,
    failed: usize,
    skipped: usize,
}

impl TestingProgress {
    pub fn new(total: usize, jobs: usize, verbose: bool) -> Self {
        eprintln!(
            "{}",
            format!("-- Testing: {total} tests, max {jobs} concurrent tasks --").bold()
        );
        let pb = (!verbose).then(|| {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        });
        Self {
            pb,
            verbose,
            passed: 0,
            failed: 0,
            skipped: 0,
        }
    }

    pub fn update(&mut self, result: &TestCaseResult) {
        match result.code {
            TestResultCode::TestPassed => self.passed += 1,
            code if code.is_skip() => self.skipped += 1,
            _ => self.failed += 1,
        }

        let line = format!("[{}] {}", status_word(result.code), result.test_name);
        match &self.pb {
            Some(pb) => {
                if result.code.is_failure() {
                    pb.println(line);
                }
                pb.inc(1);
                pb.set_message(format!(
                    "Pass: {} Fail: {} Skip: {}",
                    self.passed, self.failed, self.skipped
                ));
            }
            None if self.verbose => {
                eprintln!("{line}");
                if result.code != TestResultCode::TestPassed && !result.msg.is_empty() {
                    eprintln!("  {}", result.msg);
                }
            }
            None => {}
        }
    }

    pub fn finish(&self) {
        if let Some(pb) = &self.pb {
            pb.finish_and_clear();
        }
    }
}

fn status_word(code: TestResultCode) -> ColoredString {
    match code {
        TestResultCode::TestPassed => "PASS".green(),
        TestResultCode::TestSkipped => "SKIP".yellow(),
        TestResultCode::TestPermanentlySkipped => "PERM".yellow().dimmed(),
        TestResultCode::CompileTimeout | TestResultCode::ExecuteTimeout => "TIME".magenta(),
        TestResultCode::TestUnexpectedPassed => "UPASS".red(),
        _ => "FAIL".red().bold(),
    }
}
