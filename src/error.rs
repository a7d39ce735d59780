//! Error types shared by the network core and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Weight shapes or configured values that can never produce a valid run
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid config file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    /// A dataset line that cannot be decoded; aborts the whole run
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// A live query whose pixel grid is unusable
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt weight file {}: {reason}", .path.display())]
    CorruptWeights { path: PathBuf, reason: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("dataset error: {0}")]
    Dataset(String),
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }

    /// True for errors caused by the caller's input rather than the server's state.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::InputValidation(_))
    }
}
