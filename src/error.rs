//! Error taxonomy for one date's pipeline run.

use parquet::errors::ParquetError;
use thiserror::Error;

/// Errors raised by the extract, refine and load stages for a single date.
///
/// Only [`PipelineError::Schema`] is fatal for the whole run; every other
/// variant fails the current date and leaves the driver free to continue.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An expected input blob is absent (raw or refined).
    #[error("expected blob is missing: {path}")]
    MissingRawData { path: String },

    /// A blob exists but its content does not have the expected shape.
    #[error("malformed data in {path}: {reason}")]
    MalformedData { path: String, reason: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("blob store i/o failed for {path}")]
    Blob {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("columnar codec failed for {path}")]
    Columnar {
        path: String,
        #[source]
        source: ParquetError,
    },

    #[error("warehouse query failed during {stage}")]
    Warehouse {
        stage: &'static str,
        #[source]
        source: diesel::result::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PipelineError {
    pub fn malformed(path: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::MalformedData {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn warehouse(stage: &'static str) -> impl FnOnce(diesel::result::Error) -> Self {
        move |source| PipelineError::Warehouse { stage, source }
    }

    /// Subsequent loads would run against an unknown schema, so the driver must stop.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, PipelineError::Schema(_))
    }

    /// Short stage label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MissingRawData { .. } => "missing-data",
            PipelineError::MalformedData { .. } => "malformed-data",
            PipelineError::Schema(_) => "schema",
            PipelineError::Blob { .. } => "blob-store",
            PipelineError::Columnar { .. } => "columnar",
            PipelineError::Warehouse { .. } => "warehouse",
            PipelineError::Fetch(_) => "fetch",
        }
    }
}

/// `error: cause: root cause`, for log lines that should carry the whole chain.
pub fn display_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// DDL or introspection failure while evolving the warehouse schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to inspect columns of table {table}")]
    Introspect {
        table: &'static str,
        #[source]
        source: diesel::result::Error,
    },

    #[error("failed to create table {table}")]
    CreateTable {
        table: &'static str,
        #[source]
        source: diesel::result::Error,
    },

    #[error("failed to add column {column} to table {table}")]
    AddColumn {
        table: &'static str,
        column: &'static str,
        #[source]
        source: diesel::result::Error,
    },

    #[error("failed to create unique index {index} on table {table}")]
    UniqueIndex {
        table: &'static str,
        index: String,
        #[source]
        source: diesel::result::Error,
    },
}

/// Errors from the city-directory and weather HTTP APIs.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error calling {url}")]
    Transport {
        url: String,
        #[source]
        source: ureq::Error,
    },

    #[error("{url} answered with status {status}")]
    Http { url: String, status: http::StatusCode },

    #[error("failed to read response body from {url}")]
    Body {
        url: String,
        #[source]
        source: ureq::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_schema_errors_stop_the_run() {
        let schema = PipelineError::from(SchemaError::CreateTable {
            table: "dim_city",
            source: diesel::result::Error::NotFound,
        });
        assert!(schema.is_fatal_for_run());
        assert_eq!(schema.kind(), "schema");

        let missing = PipelineError::MissingRawData { path: "raw/x".into() };
        assert!(!missing.is_fatal_for_run());
    }

    #[test]
    fn display_chain_includes_sources() {
        let err = PipelineError::Blob {
            path: "raw/date=2024-01-15/city_data.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            display_chain(&err),
            "blob store i/o failed for raw/date=2024-01-15/city_data.json: denied"
        );
    }
}
