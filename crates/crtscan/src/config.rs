//! Run configuration.
//!
//! Settings come from three layers, highest first: command line, TOML file
//! (`--config`), built-in defaults. Both upper layers are [`ScanSettings`]
//! with every field optional; [`PipelineConfig::resolve`] fills the gaps
//! and validates the result once, before anything starts.

use crate::error::{ConfigError, ConfigResult};
use crate::evaluate::EvaluatorKind;
use crate::retry::RetryPolicy;
use crate::source::postgres::DEFAULT_SOURCE_URL;
use crate::source::{PaginationMode, SourceQuery};
use crate::types::Cursor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_OUTPUT_PATH: &str = "result.csv";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Input queue depth per worker.
const INPUT_DEPTH_PER_WORKER: usize = 100;
/// Output queue depth per worker.
const OUTPUT_DEPTH_PER_WORKER: usize = 10;

/// Source connection and query shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    pub url: Option<String>,
    pub table: Option<String>,
    pub id_column: Option<String>,
    pub payload_column: Option<String>,
    /// Empty string disables the evaluator's default prefilter.
    pub filter: Option<String>,
}

/// One configuration layer. `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSettings {
    pub evaluator: Option<String>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub input_queue_depth: Option<usize>,
    pub output_queue_depth: Option<usize>,
    pub start_cursor: Option<i64>,
    pub out: Option<PathBuf>,
    pub pagination: Option<PaginationMode>,
    pub follow: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub retry_interval_secs: Option<u64>,
    pub retry_jitter_ms: Option<u64>,
    pub revocation: Option<bool>,
    pub source: SourceSettings,
}

impl ScanSettings {
    /// Load a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Layer `self` over `lower`: fields set here win.
    pub fn over(self, lower: ScanSettings) -> ScanSettings {
        ScanSettings {
            evaluator: self.evaluator.or(lower.evaluator),
            workers: self.workers.or(lower.workers),
            batch_size: self.batch_size.or(lower.batch_size),
            input_queue_depth: self.input_queue_depth.or(lower.input_queue_depth),
            output_queue_depth: self.output_queue_depth.or(lower.output_queue_depth),
            start_cursor: self.start_cursor.or(lower.start_cursor),
            out: self.out.or(lower.out),
            pagination: self.pagination.or(lower.pagination),
            follow: self.follow.or(lower.follow),
            poll_interval_secs: self.poll_interval_secs.or(lower.poll_interval_secs),
            retry_interval_secs: self.retry_interval_secs.or(lower.retry_interval_secs),
            retry_jitter_ms: self.retry_jitter_ms.or(lower.retry_jitter_ms),
            revocation: self.revocation.or(lower.revocation),
            source: SourceSettings {
                url: self.source.url.or(lower.source.url),
                table: self.source.table.or(lower.source.table),
                id_column: self.source.id_column.or(lower.source.id_column),
                payload_column: self.source.payload_column.or(lower.source.payload_column),
                filter: self.source.filter.or(lower.source.filter),
            },
        }
    }
}

/// Fully resolved, validated configuration. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub worker_count: usize,
    pub input_queue_depth: usize,
    pub output_queue_depth: usize,
    pub batch_size: usize,
    pub start_cursor: Cursor,
    pub output_path: PathBuf,
    pub evaluator: EvaluatorKind,
    pub pagination: PaginationMode,
    /// Poll interval when tailing; `None` for a bounded run.
    pub follow: Option<Duration>,
    pub retry: RetryPolicy,
    pub source_url: String,
    pub query: SourceQuery,
    pub revocation: bool,
}

impl PipelineConfig {
    /// Defaults for `evaluator`, with its crt.sh prefilter.
    pub fn new(evaluator: EvaluatorKind) -> Self {
        Self {
            worker_count: DEFAULT_WORKERS,
            input_queue_depth: DEFAULT_WORKERS * INPUT_DEPTH_PER_WORKER,
            output_queue_depth: DEFAULT_WORKERS * OUTPUT_DEPTH_PER_WORKER,
            batch_size: DEFAULT_BATCH_SIZE,
            start_cursor: Cursor::INITIAL,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            evaluator,
            pagination: PaginationMode::default(),
            follow: None,
            retry: RetryPolicy::default(),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            query: SourceQuery::crtsh().with_filter(evaluator.default_filter()),
            revocation: true,
        }
    }

    /// Apply defaults to merged settings and validate.
    pub fn resolve(settings: ScanSettings) -> ConfigResult<Self> {
        let evaluator = match settings.evaluator.as_deref() {
            Some(name) => EvaluatorKind::from_name(name)?,
            None => {
                return Err(ConfigError::MissingEvaluator {
                    available: EvaluatorKind::available(),
                })
            }
        };

        let worker_count = settings.workers.unwrap_or(DEFAULT_WORKERS);
        let source_defaults = SourceQuery::crtsh();
        let mut query = SourceQuery {
            table: settings.source.table.unwrap_or(source_defaults.table),
            id_column: settings.source.id_column.unwrap_or(source_defaults.id_column),
            payload_column: settings
                .source
                .payload_column
                .unwrap_or(source_defaults.payload_column),
            filter: None,
        };
        query.filter = match settings.source.filter {
            Some(filter) if filter.trim().is_empty() => None,
            Some(filter) => Some(filter),
            None if query.is_crtsh_layout() => Some(evaluator.default_filter()),
            None => None,
        };

        let poll = Duration::from_secs(
            settings
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        );
        let retry = RetryPolicy::fixed(
            settings
                .retry_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(RetryPolicy::DEFAULT_INTERVAL),
        )
        .with_jitter(Duration::from_millis(settings.retry_jitter_ms.unwrap_or(0)));

        let config = Self {
            worker_count,
            input_queue_depth: settings
                .input_queue_depth
                .unwrap_or(worker_count.saturating_mul(INPUT_DEPTH_PER_WORKER)),
            output_queue_depth: settings
                .output_queue_depth
                .unwrap_or(worker_count.saturating_mul(OUTPUT_DEPTH_PER_WORKER)),
            batch_size: settings.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            start_cursor: Cursor(settings.start_cursor.unwrap_or(0)),
            output_path: settings
                .out
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
            evaluator,
            pagination: settings.pagination.unwrap_or_default(),
            follow: settings.follow.unwrap_or(false).then_some(poll),
            retry,
            source_url: settings
                .source
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            query,
            revocation: settings.revocation.unwrap_or(true),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that must hold before any pipeline component starts.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.input_queue_depth == 0 {
            return Err(ConfigError::invalid("input_queue_depth", "must be at least 1"));
        }
        if self.output_queue_depth == 0 {
            return Err(ConfigError::invalid("output_queue_depth", "must be at least 1"));
        }
        if self.start_cursor.value() < 0 {
            return Err(ConfigError::invalid("start_cursor", "must not be negative"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("out", "must not be empty"));
        }
        if matches!(self.follow, Some(interval) if interval.is_zero()) {
            return Err(ConfigError::invalid(
                "poll_interval_secs",
                "must be at least 1 when following",
            ));
        }
        if self.source_url.trim().is_empty() {
            return Err(ConfigError::invalid("source_url", "must not be empty"));
        }
        self.query.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_evaluator() -> ScanSettings {
        ScanSettings {
            evaluator: Some("subject-state-unknown".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::resolve(with_evaluator()).unwrap();
        assert_eq!(config.worker_count, 10);
        assert_eq!(config.input_queue_depth, 1000);
        assert_eq!(config.output_queue_depth, 100);
        assert_eq!(config.batch_size, 1000);
        assert!(config.start_cursor.is_initial());
        assert_eq!(config.output_path, PathBuf::from("result.csv"));
        assert_eq!(config.pagination, PaginationMode::Keyset);
        assert_eq!(config.follow, None);
        assert_eq!(config.retry.interval(), Duration::from_secs(60));
        assert!(config.revocation);
        assert_eq!(
            config.query.filter,
            Some(EvaluatorKind::SubjectStateUnknown.default_filter())
        );
        assert_eq!(config, PipelineConfig::new(EvaluatorKind::SubjectStateUnknown));
    }

    #[test]
    fn test_queue_depths_scale_with_workers() {
        let settings = ScanSettings {
            workers: Some(3),
            ..with_evaluator()
        };
        let config = PipelineConfig::resolve(settings).unwrap();
        assert_eq!(config.input_queue_depth, 300);
        assert_eq!(config.output_queue_depth, 30);
    }

    #[test]
    fn test_cli_over_file_over_defaults() {
        let file = ScanSettings {
            evaluator: Some("validity-too-long".to_string()),
            workers: Some(4),
            batch_size: Some(50),
            ..Default::default()
        };
        let cli = ScanSettings {
            workers: Some(2),
            ..Default::default()
        };
        let config = PipelineConfig::resolve(cli.over(file)).unwrap();
        assert_eq!(config.evaluator, EvaluatorKind::ValidityTooLong);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.output_queue_depth, 20);
    }

    #[test]
    fn test_missing_and_unknown_evaluator() {
        assert!(matches!(
            PipelineConfig::resolve(ScanSettings::default()),
            Err(ConfigError::MissingEvaluator { .. })
        ));
        let settings = ScanSettings {
            evaluator: Some("zlint".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            PipelineConfig::resolve(settings),
            Err(ConfigError::UnknownEvaluator { .. })
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        for settings in [
            ScanSettings {
                workers: Some(0),
                ..with_evaluator()
            },
            ScanSettings {
                batch_size: Some(0),
                ..with_evaluator()
            },
            ScanSettings {
                input_queue_depth: Some(0),
                ..with_evaluator()
            },
            ScanSettings {
                output_queue_depth: Some(0),
                ..with_evaluator()
            },
            ScanSettings {
                start_cursor: Some(-1),
                ..with_evaluator()
            },
            ScanSettings {
                follow: Some(true),
                poll_interval_secs: Some(0),
                ..with_evaluator()
            },
        ] {
            assert!(matches!(
                PipelineConfig::resolve(settings),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
    }

    #[test]
    fn test_filter_resolution() {
        let disabled = ScanSettings {
            source: SourceSettings {
                filter: Some(String::new()),
                ..Default::default()
            },
            ..with_evaluator()
        };
        assert_eq!(PipelineConfig::resolve(disabled).unwrap().query.filter, None);

        let custom_table = ScanSettings {
            source: SourceSettings {
                table: Some("certs".to_string()),
                ..Default::default()
            },
            ..with_evaluator()
        };
        assert_eq!(PipelineConfig::resolve(custom_table).unwrap().query.filter, None);

        let bad = ScanSettings {
            source: SourceSettings {
                filter: Some("true; DROP TABLE certificate".to_string()),
                ..Default::default()
            },
            ..with_evaluator()
        };
        assert!(matches!(PipelineConfig::resolve(bad), Err(ConfigError::InvalidSql(_))));
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
evaluator = "subject-country-invalid"
workers = 4
follow = true
poll_interval_secs = 5
pagination = "offset"

[source]
table = "certificate"
filter = "issuer_ca_id = 1"
"#
        )
        .unwrap();

        let settings = ScanSettings::load(file.path()).unwrap();
        let config = PipelineConfig::resolve(settings).unwrap();
        assert_eq!(config.evaluator, EvaluatorKind::SubjectCountryInvalid);
        assert_eq!(config.follow, Some(Duration::from_secs(5)));
        assert_eq!(config.pagination, PaginationMode::Offset);
        assert_eq!(config.query.filter.as_deref(), Some("issuer_ca_id = 1"));
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wokers = 3").unwrap();
        assert!(matches!(
            ScanSettings::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ScanSettings::load(Path::new("/nonexistent/crtscan.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
