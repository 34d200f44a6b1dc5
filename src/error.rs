//! Error taxonomy for the ECM pipeline
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Configuration | `Config`, `MissingCheckpoint`, `MissingFile` | abort startup |
//! | Shape / alignment | `ShapeMismatch`, `VocabMismatch` | abort where detected |
//! | Data | `Data`, `InvalidId` | abort; wrong-length rows are repaired before this point |
//!
//! Library functions return `anyhow::Result` and wrap these variants, so
//! callers can recover the typed error with `downcast_ref::<EcmError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EcmError {
    /// A configuration value is missing, zero, or inconsistent with another.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Checkpoint requested through `training.restore_from` does not exist.
    #[error("cannot find the checkpoint to restore from: {}", path.display())]
    MissingCheckpoint { path: PathBuf },

    /// An input file named in the configuration does not exist.
    #[error("missing {what} file: {}", path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    /// Two tensors that must agree on a dimension do not.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    /// An id falls outside the configured vocabulary layout.
    #[error("id {id} is outside the {space} space of width {width}")]
    VocabMismatch {
        id: i64,
        space: &'static str,
        width: usize,
    },

    /// A row of an input file could not be interpreted.
    #[error("malformed input in {}:{line}: {message}", path.display())]
    Data {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A cleaned input id does not land in the embedding index space after
    /// the shift (anything below the reserved range).
    #[error("row {row}: id {id} cannot be shifted into the embedding index space")]
    InvalidId { row: usize, id: i64 },
}

impl EcmError {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
