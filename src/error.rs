use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop a train or classify call.
#[derive(Debug, Error)]
pub enum Error {
    /// Input missing or unreadable. `path` is `None` when reading from a plain reader.
    #[error("failed to read {}: {source}", input_name(.path))]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// Malformed input row. `row` is the 1-based line number.
    #[error("malformed row {row}: {reason}")]
    Format { row: u64, reason: String },

    #[error("expected {expected} examples but input ended after {found}")]
    ShortInput { expected: usize, found: usize },

    #[error("class {class} has no training examples")]
    EmptyClass { class: usize },

    /// A pool slot failed or the pool refused the request.
    #[error("slot {slot} failed: {reason}")]
    Dispatch { slot: usize, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model has not been trained")]
    NotTrained,
}

fn input_name(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "input".to_string(),
    }
}

impl Error {
    pub(crate) fn dispatch(slot: usize, reason: impl Into<String>) -> Self {
        Error::Dispatch {
            slot,
            reason: reason.into(),
        }
    }

    pub(crate) fn format(row: u64, reason: impl Into<String>) -> Self {
        Error::Format {
            row,
            reason: reason.into(),
        }
    }
}
