//! The scanning pipeline.
//!
//! ```text
//! Paginator ──input queue──▶ Worker × N ──output queue──▶ Writer
//! ```
//!
//! Both queues are bounded; a full queue blocks its producer and that is
//! the only flow control. [`Pipeline::run`] is the lifecycle coordinator:
//! it closes the input queue only once the paginator has returned and the
//! output queue only once every worker has been joined, so nothing already
//! queued is lost.

pub mod paginator;
pub mod worker;
pub mod writer;

use crate::config::PipelineConfig;
use crate::enrich::Enricher;
use crate::error::PipelineError;
use crate::evaluate::Evaluator;
use crate::source::RecordSource;
use crate::types::{Cursor, ReportSchema};
use paginator::{Paginator, PaginatorReport, PaginatorSettings};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker::{run_worker, WorkerContext, WorkerReport};
use writer::{ReportWriter, WriterReport};

// ============================================================================
// Lifecycle
// ============================================================================

/// Coordinator states, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Running,
    SourceExhausted,
    WorkersDraining,
    WorkersIdle,
    WriterDraining,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Running => "running",
            LifecycleState::SourceExhausted => "source_exhausted",
            LifecycleState::WorkersDraining => "workers_draining",
            LifecycleState::WorkersIdle => "workers_idle",
            LifecycleState::WriterDraining => "writer_draining",
            LifecycleState::Terminated => "terminated",
        }
    }

    pub fn next(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Running => Some(LifecycleState::SourceExhausted),
            LifecycleState::SourceExhausted => Some(LifecycleState::WorkersDraining),
            LifecycleState::WorkersDraining => Some(LifecycleState::WorkersIdle),
            LifecycleState::WorkersIdle => Some(LifecycleState::WriterDraining),
            LifecycleState::WriterDraining => Some(LifecycleState::Terminated),
            LifecycleState::Terminated => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated state machine with its transition history.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Running,
            history: vec![LifecycleState::Running],
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Move to `to`, which must be the immediate successor of the current state.
    pub fn advance(&mut self, to: LifecycleState) -> Result<(), PipelineError> {
        if self.state.next() != Some(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!(from = %self.state, to = %to, "Pipeline lifecycle transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Everything a run did, for the final log line and for tests.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub paginator: PaginatorReport,
    pub workers: WorkerReport,
    pub writer: WriterReport,
    pub lifecycle: Vec<LifecycleState>,
    pub header_written: bool,
    pub elapsed: Duration,
}

impl PipelineSummary {
    /// Cursor to pass as `--start-cursor` to resume.
    pub fn final_cursor(&self) -> Cursor {
        self.paginator.final_cursor
    }

    pub fn log(&self) {
        info!(
            records = self.paginator.records,
            batches = self.paginator.batches,
            skipped = self.paginator.skipped,
            retries = self.paginator.retries,
            processed = self.workers.processed,
            decode_errors = self.workers.decode_errors,
            evaluation_errors = self.workers.evaluation_errors,
            not_applicable = self.workers.not_applicable,
            passed = self.workers.passed,
            emitted = self.workers.emitted,
            written = self.writer.written,
            write_failures = self.writer.failed,
            rejected = self.writer.rejected,
            elapsed_secs = self.elapsed.as_secs(),
            "Total processed"
        );
        info!(
            cursor = %self.final_cursor(),
            cancelled = self.paginator.cancelled,
            "Resume with --start-cursor {}",
            self.final_cursor()
        );
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn RecordSource>,
    evaluator: Arc<dyn Evaluator>,
    enricher: Option<Arc<dyn Enricher>>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn RecordSource>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            config,
            source,
            evaluator,
            enricher: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Use an externally owned token (e.g. cancelled on Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Evaluator columns followed by enricher columns.
    pub fn schema(&self) -> ReportSchema {
        let schema = ReportSchema::new(self.evaluator.columns());
        match &self.enricher {
            Some(enricher) => schema.extended(enricher.columns()),
            None => schema,
        }
    }

    /// Run to completion (or cancellation) and report what happened.
    pub async fn run<W>(self, sink: W) -> Result<PipelineSummary, PipelineError>
    where
        W: Write + Send + 'static,
    {
        let started = Instant::now();
        let schema = self.schema();
        let Pipeline {
            config,
            source,
            evaluator,
            enricher,
            cancel,
        } = self;

        let header_written = config.start_cursor.is_initial();
        let writer = ReportWriter::new(sink, &schema, header_written)?;
        let mut lifecycle = Lifecycle::new();
        let mut failures: Vec<(&'static str, String)> = Vec::new();

        info!(
            evaluator = evaluator.name(),
            workers = config.worker_count,
            batch_size = config.batch_size,
            input_queue = config.input_queue_depth,
            output_queue = config.output_queue_depth,
            start_cursor = %config.start_cursor,
            columns = schema.width(),
            "Starting pipeline"
        );

        let (input_tx, input_rx) = mpsc::channel(config.input_queue_depth);
        let (output_tx, output_rx) = mpsc::channel(config.output_queue_depth);

        let writer_handle = tokio::task::spawn_blocking(move || writer.run(output_rx));

        let input_rx = Arc::new(Mutex::new(input_rx));
        let mut workers = JoinSet::new();
        for worker_id in 0..config.worker_count {
            let ctx = WorkerContext {
                input: Arc::clone(&input_rx),
                output: output_tx.clone(),
                evaluator: Arc::clone(&evaluator),
                enricher: enricher.clone(),
            };
            workers.spawn(run_worker(worker_id, ctx));
        }
        // Workers hold the only receivers now; if they all die the paginator
        // sees a closed queue instead of blocking forever.
        drop(input_rx);

        let paginator = Paginator::new(
            source,
            PaginatorSettings {
                mode: config.pagination,
                batch_size: config.batch_size,
                start_cursor: config.start_cursor,
                follow: config.follow,
            },
            config.retry,
            cancel,
        );
        let paginator_handle = tokio::spawn(paginator.run(input_tx));

        let paginator_report = match paginator_handle.await {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "Paginator task failed");
                failures.push(("paginator", err.to_string()));
                PaginatorReport {
                    final_cursor: config.start_cursor,
                    ..Default::default()
                }
            }
        };
        lifecycle.advance(LifecycleState::SourceExhausted)?;

        lifecycle.advance(LifecycleState::WorkersDraining)?;
        let mut worker_totals = WorkerReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => worker_totals.merge(&report),
                Err(err) => {
                    error!(error = %err, "Worker task failed");
                    failures.push(("worker", err.to_string()));
                }
            }
        }
        lifecycle.advance(LifecycleState::WorkersIdle)?;

        drop(output_tx);
        lifecycle.advance(LifecycleState::WriterDraining)?;
        let writer_report = match writer_handle.await {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "Writer task failed");
                failures.push(("writer", err.to_string()));
                WriterReport::default()
            }
        };
        lifecycle.advance(LifecycleState::Terminated)?;

        let summary = PipelineSummary {
            paginator: paginator_report,
            workers: worker_totals,
            writer: writer_report,
            lifecycle: lifecycle.history().to_vec(),
            header_written,
            elapsed: started.elapsed(),
        };
        summary.log();

        match failures.into_iter().next() {
            Some((stage, message)) => Err(PipelineError::StageFailed { stage, message }),
            None => Ok(summary),
        }
    }
}
