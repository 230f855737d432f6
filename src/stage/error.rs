//! Error types for stage runs.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StorageError;

/// Errors that abort a stage run for one book.
///
/// Outputs of stages that completed before the error stay on disk together
/// with their manifest entries and are valid inputs for a retry.
#[derive(Debug, Error)]
pub enum StageError {
    /// A generation or book info the stage reads does not exist.
    #[error("stage '{stage}': missing {what} at {path}")]
    MissingInput {
        stage: String,
        /// `chapter store` or `book info`.
        what: &'static str,
        path: PathBuf,
    },

    /// Stage list or processor options are invalid.
    #[error("stage '{stage}': invalid configuration: {message}")]
    Config { stage: String, message: String },

    /// A processor failed while transforming book info or a chapter.
    #[error("stage '{stage}': processor failed on {target}: {message}")]
    Processor {
        stage: String,
        /// `book info` or `chapter <id>`.
        target: String,
        message: String,
    },

    /// Reading or writing a generation failed.
    #[error("stage '{stage}': {source}")]
    Storage {
        stage: String,
        #[source]
        source: StorageError,
    },

    /// The provenance manifest could not be written.
    #[error("failed to write pipeline manifest: {source}")]
    Manifest {
        #[source]
        source: StorageError,
    },
}

impl StageError {
    pub(crate) fn storage(stage: &str, source: StorageError) -> Self {
        Self::Storage {
            stage: stage.to_string(),
            source,
        }
    }

    pub(crate) fn config(stage: &str, message: impl Into<String>) -> Self {
        Self::Config {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Stage the error belongs to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::MissingInput { stage, .. }
            | Self::Config { stage, .. }
            | Self::Processor { stage, .. }
            | Self::Storage { stage, .. } => Some(stage),
            Self::Manifest { .. } => None,
        }
    }
}
