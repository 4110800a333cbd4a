use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures of the reconciliation pipeline.
///
/// Data-quality problems (bad keys, unkeyed questions, unmapped taxonomy) are
/// never errors; they are counted in [`crate::reconcile::ReconcileReport`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// The source cannot be read as a table at all.
    #[error("ingest stage: cannot parse {origin} as a table: {message}")]
    Format { origin: String, message: String },

    /// A required column is missing, ambiguous, or collides after normalization.
    #[error("schema stage: {origin}: {message}")]
    Schema { origin: String, message: String },

    #[error("ingest stage: failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config stage: {0}")]
    Config(String),

    #[error("export stage: cannot write {path}: {message}")]
    Export { path: PathBuf, message: String },
}

impl EngineError {
    pub fn format(origin: impl Into<String>, message: impl Display) -> Self {
        EngineError::Format {
            origin: origin.into(),
            message: message.to_string(),
        }
    }

    pub fn schema(origin: impl Into<String>, message: impl Display) -> Self {
        EngineError::Schema {
            origin: origin.into(),
            message: message.to_string(),
        }
    }

    pub fn export(path: impl Into<PathBuf>, message: impl Display) -> Self {
        EngineError::Export {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            EngineError::Format { .. } | EngineError::Io { .. } => "ingest",
            EngineError::Schema { .. } => "schema",
            EngineError::Config(_) => "config",
            EngineError::Export { .. } => "export",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_stage_and_origin() {
        let err = EngineError::schema("base_alunos.csv", "no column matches CADERNO");
        assert_eq!(err.stage(), "schema");
        assert_eq!(
            err.to_string(),
            "schema stage: base_alunos.csv: no column matches CADERNO"
        );

        let err = EngineError::format("mapa.xlsx", "workbook has no sheets");
        assert_eq!(err.stage(), "ingest");
        assert!(err.to_string().contains("mapa.xlsx"));

        let err = EngineError::export("out/gaps.parquet", "disk full");
        assert_eq!(err.stage(), "export");
        assert_eq!(err.to_string(), "export stage: cannot write out/gaps.parquet: disk full");
    }
}
