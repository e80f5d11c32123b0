//! Record evaluators.
//!
//! An evaluator is a pure, thread-safe predicate over one [`RawRecord`]. The
//! set is closed: [`EvaluatorKind`] is looked up by name once at startup and
//! the pipeline only ever sees the resulting `Arc<dyn Evaluator>`.

pub mod certificate;
pub mod regions;
pub mod rules;

use crate::error::{ConfigError, RecordError};
use crate::types::{EvaluationOutcome, RawRecord};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use rules::{SubjectCountryInvalid, SubjectStateUnknown, ValidityTooLong};

/// Outcome plus the report fields of a triggered record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Evaluation {
    pub outcome: EvaluationOutcome,
    /// Populated only when the outcome emits a row; matches `columns()`.
    pub fields: Vec<String>,
}

impl Evaluation {
    pub fn not_applicable() -> Self {
        Self::from(EvaluationOutcome::not_applicable())
    }

    pub fn pass() -> Self {
        Self::from(EvaluationOutcome::pass())
    }

    pub fn with_fields(outcome: EvaluationOutcome, fields: Vec<String>) -> Self {
        Self { outcome, fields }
    }
}

impl From<EvaluationOutcome> for Evaluation {
    fn from(outcome: EvaluationOutcome) -> Self {
        Self {
            outcome,
            fields: Vec::new(),
        }
    }
}

/// A per-record rule. Invoked concurrently from every worker.
pub trait Evaluator: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Report columns this evaluator fills, in order.
    fn columns(&self) -> Vec<String>;

    fn evaluate(&self, record: &RawRecord) -> Result<Evaluation, RecordError>;
}

// ============================================================================
// Registry
// ============================================================================

/// The available evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluatorKind {
    SubjectStateUnknown,
    SubjectCountryInvalid,
    ValidityTooLong,
}

/// Shared by every crt.sh prefilter: skip certificates that already expired.
const UNEXPIRED: &str = "coalesce(x509_notAfter(certificate), 'infinity'::timestamp) >= date_trunc('year', now() AT TIME ZONE 'UTC') \
     AND x509_notAfter(certificate) >= now() AT TIME ZONE 'UTC'";

impl EvaluatorKind {
    pub const ALL: [EvaluatorKind; 3] = [
        EvaluatorKind::SubjectStateUnknown,
        EvaluatorKind::SubjectCountryInvalid,
        EvaluatorKind::ValidityTooLong,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EvaluatorKind::SubjectStateUnknown => "subject-state-unknown",
            EvaluatorKind::SubjectCountryInvalid => "subject-country-invalid",
            EvaluatorKind::ValidityTooLong => "validity-too-long",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EvaluatorKind::SubjectStateUnknown => {
                "stateOrProvinceName is not a subdivision of the subject country (US, CA, AU, DE)"
            }
            EvaluatorKind::SubjectCountryInvalid => {
                "countryName is malformed or a user-assigned ISO 3166 code"
            }
            EvaluatorKind::ValidityTooLong => {
                "leaf issued on/after 2020-09-01 is valid for more than 398 days"
            }
        }
    }

    /// Comma-separated registry names, for error messages.
    pub fn available() -> String {
        Self::ALL
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        let wanted = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownEvaluator {
                name: name.to_string(),
                available: Self::available(),
            })
    }

    pub fn build(&self) -> Arc<dyn Evaluator> {
        match self {
            EvaluatorKind::SubjectStateUnknown => Arc::new(SubjectStateUnknown),
            EvaluatorKind::SubjectCountryInvalid => Arc::new(SubjectCountryInvalid),
            EvaluatorKind::ValidityTooLong => Arc::new(ValidityTooLong::new()),
        }
    }

    /// crt.sh predicate narrowing the scan to certificates the rule can
    /// apply to. Used only against the default crt.sh layout.
    pub fn default_filter(&self) -> String {
        let narrowing = match self {
            EvaluatorKind::SubjectStateUnknown => {
                "(SELECT x509_nameAttributes(certificate, 'stateOrProvinceName', TRUE) LIMIT 1) IS NOT NULL"
            }
            EvaluatorKind::SubjectCountryInvalid => {
                "(SELECT x509_nameAttributes(certificate, 'countryName', TRUE) LIMIT 1) IS NOT NULL"
            }
            EvaluatorKind::ValidityTooLong => {
                "x509_notBefore(certificate) >= '2020-09-01'::timestamp"
            }
        };
        format!("{UNEXPIRED} AND {narrowing}")
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvaluatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
