#![forbid(unsafe_code)]

use std::error::Error as _;
use std::io::{self, BufWriter, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use keyjoin::{
    FrameError, IoError, JoinOptions, JoinRequest, KeyNormalizer, KeySpec, KeyjoinError,
    run_join,
};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// Join two CSV files using key columns.
///
/// Rows of FILE1 are paired with rows of FILE2 whose key columns match. With
/// several --columns lists, later lists disambiguate rows the earlier ones
/// could not pair uniquely. Unpaired rows from both files are kept.
#[derive(Parser, Debug)]
#[command(name = "keyjoin", version)]
struct Args {
    /// Columns to use as keys (comma separated); repeat for further key lists
    #[arg(short = 'C', long = "columns", value_name = "LIST", required = true)]
    columns: Vec<String>,

    /// Key columns for file 2 (if different); same count and arity as --columns
    #[arg(short = 'D', long = "second-columns", value_name = "LIST")]
    second_columns: Vec<String>,

    /// Ignore case of keys
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Clean up whitespace before comparing keys
    #[arg(short = 'w', long)]
    whitespace: bool,

    /// Lines from file 1 only
    #[arg(short = '1', long = "file-one-only")]
    file_one_only: bool,

    /// Use the keys cumulatively
    #[arg(short = 'P', long)]
    cumulative: bool,

    /// Emit every pairing when a row matches several rows of file 2
    #[arg(short = 'A', long)]
    all_combinations: bool,

    /// Print a JSON summary of the join to stderr
    #[arg(long)]
    summary: bool,

    /// Input file 1
    file1: PathBuf,

    /// Input file 2
    file2: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report(&error);
            if error.is_configuration_error() {
                // usage text goes to stderr; stdout stays reserved for csv
                eprintln!("{}", Args::command().render_help());
            }
            ExitCode::from(error.exit_code())
        }
    }
}

fn run(args: &Args) -> Result<(), KeyjoinError> {
    let request = JoinRequest {
        file_one: args.file1.clone(),
        file_two: args.file2.clone(),
        keys: KeySpec::parse(args.columns.as_slice(), args.second_columns.as_slice())?,
        normalizer: KeyNormalizer::new(args.ignore_case, args.whitespace),
        options: JoinOptions {
            cumulative: args.cumulative,
            all_combinations: args.all_combinations,
            left_only: args.file_one_only,
        },
    };

    let stdout = io::stdout();
    let summary = run_join(&request, BufWriter::new(stdout.lock()))?;
    tracing::info!(
        output_rows = summary.output_rows,
        unmatched_left = summary.unmatched_left_rows,
        unmatched_right = summary.unmatched_right_rows,
        "join complete"
    );

    if args.summary {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => eprintln!("{json}"),
            Err(error) => tracing::warn!(%error, "could not serialize join summary"),
        }
    }

    Ok(())
}

fn report(error: &KeyjoinError) {
    if let KeyjoinError::Io(IoError::Frame(FrameError::MissingKeyColumns {
        source_name,
        columns,
    })) = error
    {
        for column in columns {
            eprintln!("keyjoin error: column '{column}' does not exist in file '{source_name}'");
        }
        return;
    }

    eprintln!("keyjoin error: {error}");
    let mut cause = error.source();
    while let Some(inner) = cause {
        eprintln!("  caused by: {inner}");
        cause = inner.source();
    }
}

fn init_logging() {
    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}
