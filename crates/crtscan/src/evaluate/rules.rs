//! Certificate lint rules.

use super::certificate::{Certificate, CERTIFICATE_COLUMNS};
use super::regions;
use super::{Evaluation, Evaluator};
use crate::error::RecordError;
use crate::types::{EvaluationOutcome, RawRecord};
use chrono::{DateTime, TimeZone, Utc};

fn certificate_columns() -> Vec<String> {
    CERTIFICATE_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Attach the certificate's report fields when the outcome emits a row.
fn finish(cert: &Certificate<'_>, outcome: EvaluationOutcome) -> Evaluation {
    if outcome.emits_row() {
        let fields = cert.report_fields(&outcome.details);
        Evaluation::with_fields(outcome, fields)
    } else {
        Evaluation::from(outcome)
    }
}

// ============================================================================
// subject-state-unknown
// ============================================================================

/// Flags subjects whose stateOrProvinceName is not a subdivision of their
/// country.
#[derive(Debug, Default)]
pub struct SubjectStateUnknown;

impl Evaluator for SubjectStateUnknown {
    fn name(&self) -> &str {
        "subject-state-unknown"
    }

    fn columns(&self) -> Vec<String> {
        certificate_columns()
    }

    fn evaluate(&self, record: &RawRecord) -> Result<Evaluation, RecordError> {
        let cert = Certificate::parse(&record.payload)?;
        let outcome = match (cert.country(), cert.province()) {
            (Some(country), Some(province)) => {
                match regions::is_known_subdivision(country, province) {
                    Some(true) => EvaluationOutcome::pass(),
                    Some(false) => EvaluationOutcome::triggered(format!(
                        "'{province}' is not a known subdivision of {}",
                        country.to_uppercase()
                    )),
                    None => EvaluationOutcome::not_applicable(),
                }
            }
            _ => EvaluationOutcome::not_applicable(),
        };
        Ok(finish(&cert, outcome))
    }
}

// ============================================================================
// subject-country-invalid
// ============================================================================

/// Flags countryName values that are not assigned ISO 3166 alpha-2 codes.
#[derive(Debug, Default)]
pub struct SubjectCountryInvalid;

impl Evaluator for SubjectCountryInvalid {
    fn name(&self) -> &str {
        "subject-country-invalid"
    }

    fn columns(&self) -> Vec<String> {
        certificate_columns()
    }

    fn evaluate(&self, record: &RawRecord) -> Result<Evaluation, RecordError> {
        let cert = Certificate::parse(&record.payload)?;
        let outcome = match cert.country() {
            None => EvaluationOutcome::not_applicable(),
            Some(country) => {
                let well_formed =
                    country.len() == 2 && country.bytes().all(|b| b.is_ascii_uppercase());
                if !well_formed {
                    EvaluationOutcome::triggered(format!(
                        "countryName '{country}' is not two upper-case letters"
                    ))
                } else if regions::is_user_assigned_country(country) {
                    EvaluationOutcome::triggered(format!(
                        "countryName '{country}' is a user-assigned code"
                    ))
                } else {
                    EvaluationOutcome::pass()
                }
            }
        };
        Ok(finish(&cert, outcome))
    }
}

// ============================================================================
// validity-too-long
// ============================================================================

/// Flags leaf certificates issued after the 398-day cap took effect whose
/// validity period exceeds it.
#[derive(Debug)]
pub struct ValidityTooLong {
    max_days: i64,
    effective: DateTime<Utc>,
}

impl ValidityTooLong {
    pub const MAX_DAYS: i64 = 398;

    pub fn new() -> Self {
        Self {
            max_days: Self::MAX_DAYS,
            // 2020-09-01T00:00:00Z
            effective: Utc.timestamp_opt(1_598_918_400, 0).single().unwrap_or_default(),
        }
    }
}

impl Default for ValidityTooLong {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for ValidityTooLong {
    fn name(&self) -> &str {
        "validity-too-long"
    }

    fn columns(&self) -> Vec<String> {
        certificate_columns()
    }

    fn evaluate(&self, record: &RawRecord) -> Result<Evaluation, RecordError> {
        let cert = Certificate::parse(&record.payload)?;
        if cert.is_ca() {
            return Ok(Evaluation::not_applicable());
        }
        let (Some(not_before), Some(not_after)) = (cert.not_before(), cert.not_after()) else {
            return Err(RecordError::Evaluation(
                "validity dates out of range".to_string(),
            ));
        };
        if not_before < self.effective {
            return Ok(Evaluation::not_applicable());
        }
        // notAfter is inclusive, so a period of exactly N days spans N days + 1s.
        let seconds = (not_after - not_before).num_seconds() + 1;
        let days = seconds as f64 / 86_400.0;
        let outcome = if seconds > self.max_days * 86_400 {
            EvaluationOutcome::triggered(format!(
                "validity of {days:.1} days exceeds {}",
                self.max_days
            ))
        } else {
            EvaluationOutcome::pass()
        };
        Ok(finish(&cert, outcome))
    }
}
