//! Converter error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::alias::CanonicalField;

pub type ConvertResult<T> = Result<T, ConvertError>;

/// A problem with one input row (or the header row).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("missing required column for `{field}`")]
    MissingRequiredColumn { field: CanonicalField },

    #[error("invalid value {value:?} for `{field}`: {reason}")]
    InvalidFieldValue {
        field: CanonicalField,
        value: String,
        reason: String,
    },

    #[error("invalid quantity {quantity:?}: must be a positive integer within the row limit")]
    InvalidQuantity { quantity: String },

    #[error("resource name `{name}` was already produced by line {first_line}")]
    DuplicateName { name: String, first_line: usize },
}

impl InputError {
    pub(crate) fn invalid(
        field: CanonicalField,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        InputError::InvalidFieldValue {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by a whole conversion run.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("sheet `{0}` not found in workbook")]
    SheetNotFound(String),

    #[error("header row: {0}")]
    Columns(#[source] InputError),

    #[error("line {line}: {source}")]
    Row {
        line: usize,
        #[source]
        source: InputError,
    },

    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Failure writing a payload to its sink.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to write payload: {0}")]
    Serialization(#[from] std::io::Error),
}
