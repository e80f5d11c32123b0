//! crtscan: resumable scanner over an append-only certificate store.
//!
//! Pages through a source (crt.sh's `certwatch` database by default),
//! decodes each certificate, applies one lint rule, optionally checks
//! revocation for every hit, and appends hits to a CSV report. A run can be
//! resumed from the cursor logged at the end of the previous one.

pub mod config;
pub mod enrich;
pub mod error;
pub mod evaluate;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod types;

pub use config::{PipelineConfig, ScanSettings, SourceSettings};
pub use enrich::{Enricher, Enrichment, RevocationChecker};
pub use error::{ConfigError, PipelineError, RecordError, SourceError};
pub use evaluate::{Evaluation, Evaluator, EvaluatorKind};
pub use pipeline::{Lifecycle, LifecycleState, Pipeline, PipelineSummary};
pub use retry::RetryPolicy;
pub use source::{Page, PageRequest, PaginationMode, PgSource, RecordSource, SourceQuery, SourceRow};
pub use types::{Cursor, EvaluationOutcome, RawRecord, ReportRow, ReportSchema};
