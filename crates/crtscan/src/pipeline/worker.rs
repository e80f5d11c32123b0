//! Worker: evaluate one record at a time, enrich hits, emit rows.

use crate::enrich::Enricher;
use crate::error::RecordError;
use crate::evaluate::Evaluator;
use crate::types::{RawRecord, ReportRow};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

/// Per-worker counters. Merged by the coordinator after the join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub decode_errors: u64,
    pub evaluation_errors: u64,
    pub not_applicable: u64,
    pub passed: u64,
    pub emitted: u64,
}

impl WorkerReport {
    pub fn merge(&mut self, other: &WorkerReport) {
        self.processed += other.processed;
        self.decode_errors += other.decode_errors;
        self.evaluation_errors += other.evaluation_errors;
        self.not_applicable += other.not_applicable;
        self.passed += other.passed;
        self.emitted += other.emitted;
    }
}

/// Shared pieces every worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub input: Arc<Mutex<mpsc::Receiver<RawRecord>>>,
    pub output: mpsc::Sender<ReportRow>,
    pub evaluator: Arc<dyn Evaluator>,
    pub enricher: Option<Arc<dyn Enricher>>,
}

/// Pull records until the input queue is closed and drained.
pub async fn run_worker(worker_id: usize, ctx: WorkerContext) -> WorkerReport {
    let mut report = WorkerReport::default();
    debug!(worker_id, "Worker started");

    loop {
        // Held only while waiting; evaluation runs without the lock.
        let next = {
            let mut rx = ctx.input.lock().await;
            rx.recv().await
        };
        let Some(record) = next else {
            break;
        };
        report.processed += 1;

        let evaluation = match ctx.evaluator.evaluate(&record) {
            Ok(evaluation) => evaluation,
            Err(RecordError::Decode(message)) => {
                warn!(
                    worker_id,
                    id = record.id,
                    cursor = %record.cursor,
                    error = %message,
                    "Failed to decode record"
                );
                report.decode_errors += 1;
                continue;
            }
            Err(RecordError::Evaluation(message)) => {
                warn!(
                    worker_id,
                    id = record.id,
                    cursor = %record.cursor,
                    error = %message,
                    "Evaluation failed"
                );
                report.evaluation_errors += 1;
                continue;
            }
        };

        if !evaluation.outcome.applicable {
            report.not_applicable += 1;
            continue;
        }
        if !evaluation.outcome.triggered {
            report.passed += 1;
            continue;
        }

        let mut fields = evaluation.fields;
        if let Some(enricher) = &ctx.enricher {
            fields.extend(enricher.enrich(&record).await.into_fields());
        }
        debug!(
            worker_id,
            id = record.id,
            details = %evaluation.outcome.details,
            "Record triggered"
        );

        if ctx.output.send(ReportRow::new(record.id, fields)).await.is_err() {
            error!(worker_id, id = record.id, "Output queue closed; worker stopping");
            break;
        }
        report.emitted += 1;
    }

    debug!(
        worker_id,
        processed = report.processed,
        emitted = report.emitted,
        "Worker finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::Evaluation;
    use crate::types::{Cursor, EvaluationOutcome};

    struct ByFirstByte;

    impl Evaluator for ByFirstByte {
        fn name(&self) -> &str {
            "first-byte"
        }

        fn columns(&self) -> Vec<String> {
            vec!["id".to_string()]
        }

        fn evaluate(&self, record: &RawRecord) -> Result<Evaluation, RecordError> {
            match record.payload.first() {
                Some(b'd') => Err(RecordError::Decode("bad".into())),
                Some(b'e') => Err(RecordError::Evaluation("boom".into())),
                Some(b'n') => Ok(Evaluation::not_applicable()),
                Some(b'p') => Ok(Evaluation::pass()),
                _ => Ok(Evaluation::with_fields(
                    EvaluationOutcome::triggered("hit"),
                    vec![record.id.to_string()],
                )),
            }
        }
    }

    #[tokio::test]
    async fn test_worker_counts_each_outcome() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let ctx = WorkerContext {
            input: Arc::new(Mutex::new(in_rx)),
            output: out_tx,
            evaluator: Arc::new(ByFirstByte),
            enricher: None,
        };

        for (id, payload) in [(1, "d"), (2, "e"), (3, "n"), (4, "p"), (5, "t")] {
            in_tx
                .send(RawRecord {
                    id,
                    cursor: Cursor(id),
                    payload: payload.as_bytes().to_vec(),
                })
                .await
                .unwrap();
        }
        drop(in_tx);

        let report = run_worker(0, ctx).await;
        assert_eq!(
            report,
            WorkerReport {
                processed: 5,
                decode_errors: 1,
                evaluation_errors: 1,
                not_applicable: 1,
                passed: 1,
                emitted: 1,
            }
        );
        let row = out_rx.recv().await.unwrap();
        assert_eq!(row.source_id(), 5);
        assert_eq!(row.fields(), &["5".to_string()]);
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut total = WorkerReport {
            processed: 2,
            emitted: 1,
            ..Default::default()
        };
        total.merge(&WorkerReport {
            processed: 3,
            passed: 3,
            ..Default::default()
        });
        assert_eq!(total.processed, 5);
        assert_eq!(total.passed, 3);
        assert_eq!(total.emitted, 1);
    }
}
