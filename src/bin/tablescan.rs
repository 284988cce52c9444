use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tablescan::scan::ScanReport;
use tablescan::{ScanEngine, ScanOptions, SyntheticDocument, TableData};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "tablescan",
    version,
    about = "Detect and extract tables from document fixtures"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan a document fixture and print every detected table as JSON.
    Scan(ScanArgs),
    /// Extract a single table at a known locator.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Input document fixture (JSON).
    #[arg(short, long)]
    input: PathBuf,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,

    /// Candidate confidence threshold for implicit detection.
    #[arg(long)]
    threshold: Option<f32>,

    /// Enable verbose warning output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Input document fixture (JSON).
    #[arg(short, long)]
    input: PathBuf,

    /// Locator of the table container, as printed by `scan`.
    #[arg(short, long)]
    locator: String,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn load_document(path: &PathBuf) -> Result<SyntheticDocument> {
    SyntheticDocument::from_json_file(path)
        .with_context(|| format!("failed to load document fixture '{}'", path.display()))
}

fn scan_options(threshold: Option<f32>) -> ScanOptions {
    let mut options = ScanOptions::default();
    if let Some(threshold) = threshold {
        options.candidate_threshold = threshold;
    }
    options
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}

fn log_report(report: &ScanReport, verbose: bool) {
    if report.warnings.is_empty() {
        return;
    }

    eprintln!("warning: {} issue(s) detected", report.warnings.len());
    if verbose {
        for warning in &report.warnings {
            eprintln!(
                "  - {:?} locator={:?} confidence={:?} attempt={:?}: {}",
                warning.code, warning.locator, warning.confidence, warning.attempt, warning.message
            );
        }
    }
}

fn run_scan(args: &ScanArgs) -> Result<ScanReport> {
    let doc = load_document(&args.input)?;
    let mut engine = ScanEngine::new(&doc, scan_options(args.threshold))?;
    let report = engine
        .request_scan(&mut |_| {})?
        .context("scan was unexpectedly skipped")?;
    print_json(&report.records, args.pretty)?;
    if !report.embedded_content_hints.is_empty() {
        eprintln!(
            "note: {} embedded document(s) may contain tables",
            report.embedded_content_hints.len()
        );
    }
    Ok(report)
}

fn run_extract(args: &ExtractArgs) -> Result<Option<TableData>> {
    let doc = load_document(&args.input)?;
    let engine = ScanEngine::new(&doc, ScanOptions::default())?;
    let data = engine.extract_at(&args.locator);
    match &data {
        Some(data) => print_json(data, args.pretty)?,
        None => eprintln!("error: locator did not resolve: {}", args.locator),
    }
    Ok(data)
}

fn main() -> ExitCode {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tablescan=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan(args) => match run_scan(&args) {
            Ok(report) => {
                log_report(&report, args.verbose);
                if report.records.is_empty() {
                    ExitCode::from(2)
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(error) => {
                eprintln!("error: {error:#}");
                ExitCode::from(1)
            }
        },
        Commands::Extract(args) => match run_extract(&args) {
            Ok(Some(_)) => ExitCode::SUCCESS,
            Ok(None) => ExitCode::from(2),
            Err(error) => {
                eprintln!("error: {error:#}");
                ExitCode::from(1)
            }
        },
    }
}
