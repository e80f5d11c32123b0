//! Secondary lookups run only on records that already triggered.
//!
//! Enrichment never fails a record: whatever goes wrong is carried in the
//! row's error column.

pub mod revocation;

use crate::types::RawRecord;
use async_trait::async_trait;

pub use revocation::{RevocationChecker, RevocationError, RevocationStatus};

/// Result of one enrichment lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    /// The looked-up value (for revocation: whether the serial is revoked).
    pub result: String,
    /// Whether the lookup completed and `result` can be trusted.
    pub confirmed: bool,
    pub error: Option<String>,
}

impl Enrichment {
    pub fn confirmed(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            confirmed: true,
            error: None,
        }
    }

    /// An unconfirmed, negative result carrying `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: false.to_string(),
            confirmed: false,
            error: Some(error.into()),
        }
    }

    pub fn into_fields(self) -> Vec<String> {
        vec![
            self.result,
            self.confirmed.to_string(),
            self.error.unwrap_or_default(),
        ]
    }
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Columns appended after the evaluator's, matching `into_fields`.
    fn columns(&self) -> Vec<String>;

    async fn enrich(&self, record: &RawRecord) -> Enrichment;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_order() {
        assert_eq!(
            Enrichment::confirmed("true").into_fields(),
            vec!["true", "true", ""]
        );
        assert_eq!(
            Enrichment::failed("timeout").into_fields(),
            vec!["false", "false", "timeout"]
        );
    }
}
