//! Report writer: the single owner of the output sink.

use crate::types::{ReportRow, ReportSchema};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// What the writer did over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub written: u64,
    /// Rows lost to a failed write or flush.
    pub failed: u64,
    /// Rows dropped because their width did not match the schema.
    pub rejected: u64,
}

/// Serializes report rows as CSV.
///
/// Rows are written in the order they arrive on the output queue, which is
/// the order workers finish them. With more than one worker that is not
/// cursor order.
pub struct ReportWriter<W: Write> {
    sink: W,
    width: usize,
    report: WriterReport,
}

impl<W: Write> ReportWriter<W> {
    /// Wrap `sink`, writing the header first when `write_header` is set.
    /// A header failure is returned; nothing has been started yet.
    pub fn new(mut sink: W, schema: &ReportSchema, write_header: bool) -> io::Result<Self> {
        if write_header {
            let header = encode_record(schema.columns())?;
            sink.write_all(&header)?;
            sink.flush()?;
            debug!(columns = schema.width(), "Wrote report header");
        }
        Ok(Self {
            sink,
            width: schema.width(),
            report: WriterReport::default(),
        })
    }

    /// Write one row. Failures are logged and counted, never returned.
    pub fn write_row(&mut self, row: &ReportRow) {
        if row.width() != self.width {
            warn!(
                id = row.source_id(),
                width = row.width(),
                expected = self.width,
                "Row width does not match report schema; dropping"
            );
            self.report.rejected += 1;
            return;
        }

        let result = encode_record(row.fields()).and_then(|buf| {
            self.sink.write_all(&buf)?;
            self.sink.flush()
        });
        match result {
            Ok(()) => self.report.written += 1,
            Err(err) => {
                error!(id = row.source_id(), error = %err, "Failed to write report row");
                self.report.failed += 1;
            }
        }
    }

    /// Drain the output queue until every sender is gone. Blocking; run on
    /// a blocking thread.
    pub fn run(mut self, mut rx: mpsc::Receiver<ReportRow>) -> WriterReport {
        while let Some(row) = rx.blocking_recv() {
            self.write_row(&row);
        }
        if let Err(err) = self.sink.flush() {
            error!(error = %err, "Final flush of report failed");
        }
        debug!(written = self.report.written, failed = self.report.failed, "Writer finished");
        self.report
    }

    pub fn report(&self) -> &WriterReport {
        &self.report
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// CSV-encode one record into its own buffer.
fn encode_record<I, S>(fields: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields).map_err(io::Error::from)?;
    writer.into_inner().map_err(|e| e.into_error())
}

/// Open the report for appending, creating it if needed.
pub fn open_report_sink(path: &Path, write_header: bool) -> io::Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    if write_header && len > 0 {
        warn!(
            path = %path.display(),
            bytes = len,
            "Report already has content; a fresh run appends a second header"
        );
    }
    if !write_header && len == 0 {
        warn!(path = %path.display(), "Resuming into an empty report; it will have no header");
    }
    Ok(file)
}
