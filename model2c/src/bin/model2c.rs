//! `model2c`: compile a model document into C.
//!
//! Usage:
//!   model2c compile model.json --name net -o out/ --tests 10
//!   model2c check model.json --name net

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};

use model2c::parse::load_model;
use model2c::{check, Astyle, CodeFormatter, CompileOptions, Identity, Placement, TestSuiteOptions};

#[derive(Debug, Parser)]
#[command(name = "model2c", version, about = "Compile trained models into C for the k2c runtime")]
struct Cli {
    /// Report pipeline progress (RUST_LOG overrides the level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate F.c, F.h, weight payloads and the test suite
    Compile(CompileArgs),
    /// Run the compatibility checks only
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Model document (JSON)
    model: PathBuf,

    /// Name of the generated C function
    #[arg(short, long)]
    name: String,
}

#[derive(Debug, Args)]
struct CompileArgs {
    #[command(flatten)]
    target: CheckArgs,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Load weights from payload files at runtime instead of inlining them
    #[arg(long)]
    external_weights: bool,

    /// Number of generated test cases (0 disables the test suite)
    #[arg(long, default_value_t = 10)]
    tests: usize,

    /// Seed for sampled test inputs
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Carry recurrent state from one test case to the next
    #[arg(long)]
    carry_state: bool,

    /// Absolute tolerance of the test comparison
    #[arg(long)]
    atol: Option<f32>,

    /// Relative tolerance of the test comparison
    #[arg(long)]
    rtol: Option<f32>,

    /// Skip running astyle over the generated code
    #[arg(long)]
    no_format: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Command::Compile(args) => cmd_compile(args, cli.verbose),
        Command::Check(args) => cmd_check(&args),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn cmd_check(args: &CheckArgs) -> model2c::Result<()> {
    let model = load_model(&args.model)?;
    check::check_model(&model, &args.name)?;
    eprintln!("{}: all checks passed", args.model.display());
    Ok(())
}

fn cmd_compile(args: CompileArgs, verbose: bool) -> model2c::Result<()> {
    let model = load_model(&args.target.model)?;

    let formatter: Box<dyn CodeFormatter> = if args.no_format {
        Box::new(Identity)
    } else {
        Box::new(Astyle::default())
    };
    let options = CompileOptions {
        function_name: args.target.name.clone(),
        placement: if args.external_weights {
            Placement::External
        } else {
            Placement::Inline
        },
        verbose,
        formatter,
    };

    let defaults = TestSuiteOptions::default();
    let tests = TestSuiteOptions {
        num_tests: args.tests,
        seed: args.seed,
        atol: args.atol.unwrap_or(defaults.atol),
        rtol: args.rtol.unwrap_or(defaults.rtol),
        independent_cases: !args.carry_state,
        ..defaults
    };

    let artifacts = model2c::convert(&model, &options, &tests, &args.out)?;
    report(&artifacts.files, &args.out);
    Ok(())
}

fn report(files: &[PathBuf], out_dir: &Path) {
    eprintln!("Generated {} files in {}", files.len(), out_dir.display());
    for file in files {
        eprintln!("  {}", file.display());
    }
}
