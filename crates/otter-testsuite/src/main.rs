use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::filter::EnvFilter;

use otter_testsuite::{
    ExecMode, ExecOptions, ExtraArgs, RunOptions, SkipList, TestsuiteConfig, preprocessed_source,
};

const DEFAULT_BINARY_DIR: &str = "build/bin";
const DEFAULT_SKIPLIST: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/skiplist.json");
const DEFAULT_TIMEOUT_SECS: u64 = 200;

#[derive(Parser, Debug)]
#[command(name = "testsuite")]
#[command(about = "Run JS conformance suites against an engine build")]
struct Args {
    /// Directory containing the engine binaries
    #[arg(short, long)]
    binary_dir: Option<PathBuf>,

    /// Maximum number of concurrently running tests
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Also run tests in the skip list
    #[arg(long)]
    test_skiplist: bool,

    /// Also run Intl tests
    #[arg(long)]
    test_intl: bool,

    /// Show every result and enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Keep work files in this directory (wiped first)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Evaluate sources lazily instead of compiling to bytecode
    #[arg(long, conflicts_with = "shermes")]
    lazy: bool,

    /// Compile with the native compiler
    #[arg(long)]
    shermes: bool,

    /// Enable compiler optimizations
    #[arg(long)]
    opt: bool,

    /// Extra compiler flag (repeatable)
    #[arg(long = "compile-args", value_name = "ARG", allow_hyphen_values = true)]
    compile_args: Vec<String>,

    /// Extra VM flag (repeatable)
    #[arg(long = "vm-args", value_name = "ARG", allow_hyphen_values = true)]
    vm_args: Vec<String>,

    /// Print the preprocessed source of a single test and exit
    #[arg(short, long)]
    dump_source: bool,

    /// Timeout in seconds for each compile or execute phase
    #[arg(long)]
    timeout: Option<u64>,

    /// Stop starting new tests after the first failure
    #[arg(short, long)]
    fail_fast: bool,

    /// Show the N slowest tests
    #[arg(long, value_name = "N", default_value_t = 0)]
    show_slowest: usize,

    /// Skip list JSON file
    #[arg(long)]
    skiplist: Option<PathBuf>,

    /// Write a JSON report to this path
    #[arg(long)]
    json_report: Option<PathBuf>,

    /// Remove passing tests from the skip list without asking
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Configuration file (default: ./testsuite.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Test files or directories
    #[arg(value_name = "PATHS", required = true)]
    paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "warn,otter_testsuite=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.dump_source {
        let [path] = args.paths.as_slice() else {
            eprintln!("{}: only one path is expected with --dump-source", "error".red().bold());
            return ExitCode::from(2);
        };
        return match preprocessed_source(path) {
            Ok(source) => {
                println!("{source}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {e}", "error".red().bold());
                ExitCode::from(2)
            }
        };
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {e}", "error".red().bold());
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(async_main(args)) {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::from(2)
        }
    }
}

async fn async_main(args: Args) -> otter_testsuite::Result<bool> {
    let config = TestsuiteConfig::load_or_default(args.config.as_deref())?;

    let skiplist_path = args
        .skiplist
        .or(config.skiplist)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SKIPLIST));
    let skiplist = SkipList::load(&skiplist_path)?;

    let mode = if args.lazy {
        ExecMode::Lazy
    } else if args.shermes {
        ExecMode::Native
    } else {
        ExecMode::Bytecode
    };
    let mut extra_args = ExtraArgs {
        compile_args: config.compile_args,
        vm_args: config.vm_args,
    };
    extra_args.compile_args.extend(args.compile_args);
    extra_args.vm_args.extend(args.vm_args);

    let binary_dir = args
        .binary_dir
        .or(config.binary_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY_DIR));
    let jobs = args.jobs.or(config.jobs).unwrap_or_else(num_cpus::get);
    let timeout = args
        .timeout
        .or(config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    println!("{}", "Otter Testsuite Runner".bold().cyan());
    println!("Binaries: {}", binary_dir.display());
    println!("Skip list: {}", skiplist_path.display());

    let options = RunOptions {
        paths: args.paths,
        work_dir: args.work_dir,
        jobs,
        test_skiplist: args.test_skiplist,
        test_intl: args.test_intl,
        fail_fast: args.fail_fast,
        verbose: args.verbose,
        show_slowest: args.show_slowest,
        json_report: args.json_report,
        assume_yes: args.yes,
        exec: ExecOptions {
            binary_dir,
            mode,
            optimize: args.opt,
            extra_args,
            timeout: Duration::from_secs(timeout),
            disable_handle_san: false,
        },
    };
    otter_testsuite::run(options, skiplist).await
}
