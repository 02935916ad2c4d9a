//! Error types for bench-dataset.

use std::path::PathBuf;

/// Errors that can occur while loading samples or post-processing outputs.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The sample table could not be read or decoded.
    #[error("Failed to load dataset {}: {reason}", path.display())]
    DataLoad { path: PathBuf, reason: String },

    /// A required column is absent from the sample table.
    ///
    /// This is the column-level data-load failure; a table without one of
    /// `tok_input`, `input` or `dataset` cannot be loaded.
    #[error("Missing column '{column}'{}", row.map(|r| format!(" in row {r}")).unwrap_or_default())]
    MissingColumn {
        column: &'static str,
        row: Option<usize>,
    },

    /// Batch rows do not line up with the per-row metadata supplied with them.
    #[error("Shape mismatch: batch has {rows} rows but {given} {what} were given")]
    ShapeMismatch {
        what: &'static str,
        /// Rows in the batch.
        rows: usize,
        /// Entries supplied for those rows.
        given: usize,
    },

    /// The prompt is longer than the generated batch is wide.
    #[error("Prompt length {prompt_length} exceeds batch width {width}")]
    InvalidPromptLength { prompt_length: usize, width: usize },

    /// Post-processing was asked to handle a batch with no rows.
    #[error("Cannot post-process an empty batch")]
    EmptyBatch,

    /// A sample index past the end of the store.
    #[error("Sample index {index} out of range (store holds {len} samples)")]
    SampleIndexOutOfRange { index: usize, len: usize },

    /// Only host tensors are produced.
    #[error("Unsupported device: {0}. Only \"cpu\" is supported")]
    UnsupportedDevice(String),

    /// The dataset builder was not given a table path.
    #[error("No dataset path configured")]
    MissingDatasetPath,

    /// Tokenizer error.
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// HuggingFace Hub error.
    #[error("HuggingFace Hub error: {0}")]
    HfHub(#[from] hf_hub::api::sync::ApiError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pickle (de)serialization error.
    #[error("Pickle error: {0}")]
    Pickle(#[from] serde_pickle::Error),

    /// Tensor shape error.
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl DatasetError {
    pub(crate) fn data_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DatasetError::DataLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for bench-dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;
