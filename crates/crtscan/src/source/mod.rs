//! Record sources.
//!
//! A source answers paged queries against an append-only store. It owns its
//! connection and query construction; the paginator only decides *where*
//! to read next and what to do when a read fails.

pub mod postgres;

use crate::error::SourceError;
use crate::types::Cursor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use postgres::{PgSource, SourceQuery};

/// How the cursor maps onto source queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// `id > cursor ORDER BY id`. Stable under concurrent inserts.
    #[default]
    Keyset,
    /// `OFFSET cursor` in insertion order.
    ///
    /// Only for sources without a monotonic key. Rows inserted while a run
    /// is in progress can shift offsets, so rows may be skipped or read
    /// twice. This is a known limitation, not something the scanner repairs.
    Offset,
}

impl PaginationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaginationMode::Keyset => "keyset",
            PaginationMode::Offset => "offset",
        }
    }
}

impl fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaginationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyset" => Ok(PaginationMode::Keyset),
            "offset" => Ok(PaginationMode::Offset),
            other => Err(format!("unknown pagination mode '{other}' (expected keyset or offset)")),
        }
    }
}

/// One paged read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub mode: PaginationMode,
    pub cursor: Cursor,
    pub limit: usize,
}

/// A row as returned by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub id: i64,
    /// `None` when the payload column was NULL or unreadable. The row still
    /// counts toward the page and still advances the cursor.
    pub payload: Option<Vec<u8>>,
}

impl SourceRow {
    pub fn new(id: i64, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload: Some(payload),
        }
    }
}

/// Rows of one page, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub rows: Vec<SourceRow>,
}

impl Page {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Paged access to an append-only record store.
#[async_trait]
pub trait RecordSource: Send {
    /// Fetch up to `request.limit` rows after `request.cursor`.
    async fn fetch(&mut self, request: PageRequest) -> Result<Page, SourceError>;

    /// Drop any held connection so the next fetch starts from scratch.
    async fn reset(&mut self) {}

    /// Human readable description for logs (never includes credentials).
    fn describe(&self) -> String;
}
