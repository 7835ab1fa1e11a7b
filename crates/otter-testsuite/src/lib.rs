//! # Otter Testsuite Runner
//!
//! Conformance test runner for external JavaScript engine binaries.
//!
//! Discovers test262, mjsunit, CVE, esprima and flow tests, applies the
//! skip list, preprocesses each test for its suite and runs it against the
//! engine under a bounded number of concurrent subprocesses. Tests from the
//! skip list that turn out to pass can be removed from it afterwards.

#![warn(clippy::all)]

pub mod ast;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod frontmatter;
pub mod preprocess;
pub mod progress;
pub mod report;
pub mod result;
pub mod runner;
pub mod scheduler;
pub mod skiplist;
pub mod suite;

pub use config::TestsuiteConfig;
pub use driver::{RunOptions, preprocessed_source, run};
pub use engine::{ExecMode, ExecOptions, ExtraArgs};
pub use error::{Result, TestsuiteError};
pub use report::{RunSummary, TestReport};
pub use result::{TestCaseResult, TestResultCode};
pub use skiplist::{SkipCategory, SkipList};
pub use suite::{SuiteKind, TestSuite, classify};
