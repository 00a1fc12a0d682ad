// ⚠️ Error Types - run-level vs entity-level failures
//
// A PipelineError aborts the run before any output is written.
// An EntityError is scoped to one entity's partition and only lands in the report.

use std::path::PathBuf;

// ============================================================================
// RUN-LEVEL ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("snapshot contains duplicate entity id '{0}'")]
    DuplicateSnapshot(String),

    #[error("invalid reference data in {table}: {message}")]
    Reference { table: String, message: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("parquet export failed: {0}")]
    Parquet(String),
}

impl PipelineError {
    pub fn reference(table: &str, message: impl Into<String>) -> Self {
        PipelineError::Reference {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub fn parquet(message: impl Into<String>) -> Self {
        PipelineError::Parquet(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// ENTITY-LEVEL ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntityError {
    #[error("malformed timestamp '{value}' in {context}")]
    MalformedTimestamp { value: String, context: String },

    #[error("malformed amount '{0}'")]
    MalformedAmount(String),
}
