//! Core data model shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Cursor
// ============================================================================

/// Position in the source.
///
/// In keyset mode this is the last source id consumed; in offset mode it is
/// the number of rows consumed. It never decreases during a run and is only
/// persisted by passing it back as `--start-cursor` on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub i64);

impl Cursor {
    /// Start of the source. Only a run starting here writes a report header.
    pub const INITIAL: Cursor = Cursor(0);

    pub fn is_initial(self) -> bool {
        self == Self::INITIAL
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Cursor {
    fn from(value: i64) -> Self {
        Cursor(value)
    }
}

// ============================================================================
// Records
// ============================================================================

/// One record read from the source. Moved through the input queue into
/// exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Source identifier (crt.sh certificate ID).
    pub id: i64,
    /// Cursor value after this record was consumed.
    pub cursor: Cursor,
    pub payload: Vec<u8>,
}

/// Verdict of an evaluator for one record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvaluationOutcome {
    /// `false` means the record is outside the rule's domain.
    pub applicable: bool,
    /// `true` means a report row must be emitted.
    pub triggered: bool,
    pub details: String,
}

impl EvaluationOutcome {
    pub fn not_applicable() -> Self {
        Self::default()
    }

    pub fn pass() -> Self {
        Self {
            applicable: true,
            triggered: false,
            details: String::new(),
        }
    }

    pub fn triggered(details: impl Into<String>) -> Self {
        Self {
            applicable: true,
            triggered: true,
            details: details.into(),
        }
    }

    /// Whether this outcome produces a report row.
    pub fn emits_row(&self) -> bool {
        self.applicable && self.triggered
    }
}

// ============================================================================
// Report
// ============================================================================

/// Column names for one run, declared once at the top of a fresh report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSchema {
    columns: Vec<String>,
}

impl ReportSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Append the columns of another collaborator (e.g. enrichment).
    pub fn extended<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// An immutable, ordered list of report fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    /// Source id of the record that produced the row (not written).
    source_id: i64,
    fields: Vec<String>,
}

impl ReportRow {
    pub fn new(source_id: i64, fields: Vec<String>) -> Self {
        Self { source_id, fields }
    }

    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_ordering_and_initial() {
        assert!(Cursor::INITIAL.is_initial());
        assert!(!Cursor(7).is_initial());
        assert!(Cursor(3) < Cursor(4));
        assert_eq!(Cursor::from(12).to_string(), "12");
    }

    #[test]
    fn test_outcome_emits_only_when_applicable_and_triggered() {
        assert!(!EvaluationOutcome::not_applicable().emits_row());
        assert!(!EvaluationOutcome::pass().emits_row());
        assert!(EvaluationOutcome::triggered("x").emits_row());

        let odd = EvaluationOutcome {
            applicable: false,
            triggered: true,
            details: String::new(),
        };
        assert!(!odd.emits_row());
    }

    #[test]
    fn test_schema_extension_keeps_order() {
        let schema = ReportSchema::new(["a", "b"]).extended(["c"]);
        assert_eq!(schema.columns(), &["a", "b", "c"]);
        assert_eq!(schema.width(), 3);
    }
}
