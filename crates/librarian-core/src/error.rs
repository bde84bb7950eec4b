use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Source file could not be read in full. Recoverable: the candidate is excluded.
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed document found while scoring. Recoverable: scored at the minimum.
    #[error("Malformed document {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    #[error("No free name left for {}", proposed.display())]
    NameCollisionExhausted { proposed: PathBuf },

    /// Writing into the library failed. Fatal for the run.
    #[error("Cannot write library file {}: {source}", path.display())]
    DestinationWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A catalog batch failed to commit and was rolled back. Fatal for the run.
    #[error("Catalog batch rolled back: {source}")]
    IndexCommit {
        #[source]
        source: rusqlite::Error,
    },

    #[error("Checkpoint {} is corrupt at line {line}: {message}", path.display())]
    CheckpointCorruption {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Checkpoint encoding error: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Per-file errors are logged and the run carries on without the file.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Error::Read { .. } | Error::Format { .. })
    }
}
