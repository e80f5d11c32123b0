//! Paginator: the only stage that reads the source and moves the cursor.

use crate::retry::{sleep_or_cancel, RetryPolicy};
use crate::source::{Page, PageRequest, PaginationMode, RecordSource};
use crate::types::{Cursor, RawRecord};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where and how to page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginatorSettings {
    pub mode: PaginationMode,
    pub batch_size: usize,
    pub start_cursor: Cursor,
    /// `Some(interval)` tails the source instead of stopping on a short batch.
    pub follow: Option<Duration>,
}

/// What the paginator did over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginatorReport {
    /// Cursor after the last record handed to the workers (or skipped).
    pub final_cursor: Cursor,
    pub batches: u64,
    /// Records pushed onto the input queue.
    pub records: u64,
    /// Rows consumed without being enqueued (unreadable payload, or a
    /// keyset row at or below the cursor).
    pub skipped: u64,
    pub retries: u64,
    pub cancelled: bool,
}

enum Push {
    Sent,
    Cancelled,
    Closed,
}

pub struct Paginator {
    source: Box<dyn RecordSource>,
    settings: PaginatorSettings,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Paginator {
    pub fn new(
        source: Box<dyn RecordSource>,
        settings: PaginatorSettings,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            settings,
            retry,
            cancel,
        }
    }

    /// Page through the source until it is exhausted (bounded run) or the
    /// token is cancelled. Dropping `tx` on return closes the input queue.
    pub async fn run(mut self, tx: mpsc::Sender<RawRecord>) -> PaginatorReport {
        let mode = self.settings.mode;
        let mut cursor = self.settings.start_cursor;
        let mut report = PaginatorReport {
            final_cursor: cursor,
            ..Default::default()
        };

        info!(
            source = %self.source.describe(),
            cursor = %cursor,
            mode = %mode,
            batch_size = self.settings.batch_size,
            follow = self.settings.follow.is_some(),
            "Starting pagination"
        );

        'pages: loop {
            let Some(page) = self.fetch_with_retry(cursor, &mut report).await else {
                report.cancelled = true;
                break;
            };
            report.batches += 1;
            let received = page.len();
            let mut enqueued = 0usize;

            for row in page.rows {
                let next = match mode {
                    PaginationMode::Keyset => {
                        if row.id <= cursor.value() {
                            warn!(
                                id = row.id,
                                cursor = %cursor,
                                "Source returned a row at or below the cursor; skipping"
                            );
                            report.skipped += 1;
                            continue;
                        }
                        Cursor(row.id)
                    }
                    PaginationMode::Offset => Cursor(cursor.value() + 1),
                };

                let Some(payload) = row.payload else {
                    warn!(id = row.id, "Unreadable payload; skipping record");
                    report.skipped += 1;
                    cursor = next;
                    continue;
                };

                let record = RawRecord {
                    id: row.id,
                    cursor: next,
                    payload,
                };
                let pushed = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Push::Cancelled,
                    sent = tx.send(record) => match sent {
                        Ok(()) => Push::Sent,
                        Err(_) => Push::Closed,
                    },
                };
                match pushed {
                    Push::Sent => {
                        cursor = next;
                        enqueued += 1;
                        report.records += 1;
                    }
                    Push::Cancelled => {
                        report.cancelled = true;
                        break 'pages;
                    }
                    Push::Closed => {
                        warn!(cursor = %cursor, "Input queue closed; stopping pagination");
                        break 'pages;
                    }
                }
            }

            info!(
                batch = report.batches,
                received,
                enqueued,
                cursor = %cursor,
                total = report.records,
                "Processed batch"
            );

            if received >= self.settings.batch_size {
                continue;
            }
            match self.settings.follow {
                None => {
                    debug!(received, cursor = %cursor, "Short batch; source exhausted");
                    break;
                }
                Some(interval) => {
                    debug!(
                        cursor = %cursor,
                        wait_secs = interval.as_secs(),
                        "Caught up; waiting for new records"
                    );
                    if !sleep_or_cancel(interval, &self.cancel).await {
                        report.cancelled = true;
                        break;
                    }
                }
            }
        }

        report.final_cursor = cursor;
        info!(
            cursor = %cursor,
            total = report.records,
            skipped = report.skipped,
            retries = report.retries,
            cancelled = report.cancelled,
            "Pagination finished"
        );
        report
    }

    /// Fetch one page, retrying forever on source errors. `None` only when
    /// cancelled.
    async fn fetch_with_retry(
        &mut self,
        cursor: Cursor,
        report: &mut PaginatorReport,
    ) -> Option<Page> {
        let request = PageRequest {
            mode: self.settings.mode,
            cursor,
            limit: self.settings.batch_size,
        };
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                fetched = self.source.fetch(request) => Some(fetched),
            };

            match result? {
                Ok(page) => {
                    if attempt > 0 {
                        info!(cursor = %cursor, attempts = attempt, "Source recovered");
                    }
                    debug!(cursor = %cursor, rows = page.len(), "Query completed");
                    return Some(page);
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    report.retries += 1;
                    let delay = self.retry.delay(attempt);
                    warn!(
                        error = %err,
                        cursor = %cursor,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Source fetch failed; retrying"
                    );
                    self.source.reset().await;
                    if !sleep_or_cancel(delay, &self.cancel).await {
                        return None;
                    }
                }
            }
        }
    }
}
