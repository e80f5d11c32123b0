//! crtscan command line.
//!
//! Usage:
//!     crtscan --evaluator subject-state-unknown --out result.csv
//!     crtscan --evaluator subject-state-unknown --start-cursor 123456789

use anyhow::Context;
use clap::Parser;
use crtscan::config::{PipelineConfig, ScanSettings, SourceSettings};
use crtscan::error::ConfigError;
use crtscan::pipeline::writer::open_report_sink;
use crtscan::{
    EvaluatorKind, PaginationMode, PgSource, Pipeline, PipelineSummary, RevocationChecker,
};
use crtscan_logging::LogConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "crtscan",
    version,
    about = "Scan an append-only certificate store, lint each certificate and append hits to a CSV report"
)]
struct Cli {
    /// TOML file supplying defaults for any flag below
    #[arg(long, env = "CRTSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Rule to apply (see --list-evaluators)
    #[arg(long, env = "CRTSCAN_EVALUATOR")]
    evaluator: Option<String>,

    /// Cursor to resume from; a non-zero cursor never writes a header
    #[arg(long = "start-cursor", visible_alias = "offset")]
    start_cursor: Option<i64>,

    /// Number of workers [default: 10]
    #[arg(long)]
    workers: Option<usize>,

    /// Rows per source query [default: 1000]
    #[arg(long)]
    batch_size: Option<usize>,

    /// Input queue capacity [default: 100 x workers]
    #[arg(long)]
    input_queue_depth: Option<usize>,

    /// Output queue capacity [default: 10 x workers]
    #[arg(long)]
    output_queue_depth: Option<usize>,

    /// CSV report, opened for appending [default: result.csv]
    #[arg(long)]
    out: Option<PathBuf>,

    /// keyset or offset [default: keyset]
    #[arg(long)]
    pagination: Option<PaginationMode>,

    /// Keep polling for new records instead of stopping at the end
    #[arg(long)]
    follow: bool,

    /// Seconds between polls when following [default: 60]
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Seconds to wait after a source failure [default: 60]
    #[arg(long)]
    retry_interval_secs: Option<u64>,

    /// Random extra milliseconds added to each retry wait [default: 0]
    #[arg(long)]
    retry_jitter_ms: Option<u64>,

    /// PostgreSQL URL of the source [default: crt.sh guest access]
    #[arg(long, env = "CRTSCAN_SOURCE_URL")]
    source_url: Option<String>,

    /// Source table [default: certificate]
    #[arg(long)]
    table: Option<String>,

    /// Monotonic id column [default: id]
    #[arg(long)]
    id_column: Option<String>,

    /// DER certificate column [default: certificate]
    #[arg(long)]
    payload_column: Option<String>,

    /// Extra read-only SQL predicate; "" disables the evaluator's default
    #[arg(long)]
    filter: Option<String>,

    /// Skip CRL revocation checks for hits
    #[arg(long)]
    no_revocation: bool,

    /// Print available evaluators and exit
    #[arg(long)]
    list_evaluators: bool,

    /// Debug logging on the console
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> ScanSettings {
        ScanSettings {
            evaluator: self.evaluator.clone(),
            workers: self.workers,
            batch_size: self.batch_size,
            input_queue_depth: self.input_queue_depth,
            output_queue_depth: self.output_queue_depth,
            start_cursor: self.start_cursor,
            out: self.out.clone(),
            pagination: self.pagination,
            follow: self.follow.then_some(true),
            poll_interval_secs: self.poll_interval_secs,
            retry_interval_secs: self.retry_interval_secs,
            retry_jitter_ms: self.retry_jitter_ms,
            revocation: self.no_revocation.then_some(false),
            source: SourceSettings {
                url: self.source_url.clone(),
                table: self.table.clone(),
                id_column: self.id_column.clone(),
                payload_column: self.payload_column.clone(),
                filter: self.filter.clone(),
            },
        }
    }
}

fn list_evaluators() {
    for kind in EvaluatorKind::ALL {
        println!("{:<26} {}", kind.name(), kind.description());
    }
}

/// Resolve configuration and the source. Nothing is started yet.
fn prepare(cli: &Cli) -> Result<(PipelineConfig, PgSource), ConfigError> {
    let file = match &cli.config {
        Some(path) => ScanSettings::load(path)?,
        None => ScanSettings::default(),
    };
    let config = PipelineConfig::resolve(cli.settings().over(file))?;
    let source = PgSource::new(config.source_url.clone(), config.query.clone())?;
    Ok((config, source))
}

async fn run(config: PipelineConfig, source: PgSource) -> anyhow::Result<PipelineSummary> {
    let write_header = config.start_cursor.is_initial();
    let sink = open_report_sink(&config.output_path, write_header)
        .with_context(|| format!("Failed to open report {}", config.output_path.display()))?;

    info!(
        evaluator = %config.evaluator,
        out = %config.output_path.display(),
        revocation = config.revocation,
        "crtscan starting"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing queued work");
            on_interrupt.cancel();
        }
    });

    let revocation = config.revocation;
    let evaluator = config.evaluator.build();
    let mut pipeline = Pipeline::new(config, Box::new(source), evaluator).with_cancellation(cancel);
    if revocation {
        let checker = RevocationChecker::new().context("Failed to set up revocation checks")?;
        pipeline = pipeline.with_enricher(Arc::new(checker));
    }

    let summary = pipeline.run(sink).await.context("Scan failed")?;
    Ok(summary)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_evaluators {
        list_evaluators();
        return ExitCode::SUCCESS;
    }

    if let Err(err) = crtscan_logging::init_logging(LogConfig {
        app_name: "crtscan",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: {err:#}");
    }

    let (config, source) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(err) => {
            error!(error = %err, "Invalid configuration");
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, source)) {
        Ok(summary) => {
            println!("{}", summary.final_cursor());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "crtscan failed");
            eprintln!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_maps_flags_to_settings() {
        let cli = Cli::parse_from([
            "crtscan",
            "--evaluator",
            "validity-too-long",
            "--offset",
            "42",
            "--workers",
            "3",
            "--follow",
            "--no-revocation",
            "--pagination",
            "offset",
        ]);
        let settings = cli.settings();
        assert_eq!(settings.evaluator.as_deref(), Some("validity-too-long"));
        assert_eq!(settings.start_cursor, Some(42));
        assert_eq!(settings.workers, Some(3));
        assert_eq!(settings.follow, Some(true));
        assert_eq!(settings.revocation, Some(false));
        assert_eq!(settings.pagination, Some(PaginationMode::Offset));
        assert_eq!(settings.batch_size, None);
    }

    #[test]
    fn test_unset_flags_defer_to_file() {
        let cli = Cli::parse_from(["crtscan"]);
        let settings = cli.settings();
        assert_eq!(settings.follow, None);
        assert_eq!(settings.revocation, None);
    }
}
