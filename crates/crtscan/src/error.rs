//! Error types for the scanner.
//!
//! Only two kinds ever stop a run: [`ConfigError`] at startup and
//! [`PipelineError`] from the coordinator. Everything per-record is logged
//! and counted by the stage that hit it.

use crate::pipeline::LifecycleState;
use std::io;
use thiserror::Error;

/// Failures talking to the record source. Always treated as transient.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to connect to source: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Source query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Failures for a single record. The record is discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record decode failed: {0}")]
    Decode(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// Startup configuration problems. Fatal before anything is spawned.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No evaluator selected (use --evaluator; available: {available})")]
    MissingEvaluator { available: String },

    #[error("Unknown evaluator '{name}' (available: {available})")]
    UnknownEvaluator { name: String, available: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    #[error("Invalid source query: {0}")]
    InvalidSql(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

/// Failures of the pipeline as a whole.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to write report header: {0}")]
    Output(#[from] io::Error),

    #[error("Pipeline stage '{stage}' failed: {message}")]
    StageFailed {
        stage: &'static str,
        message: String,
    },

    #[error("Invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
