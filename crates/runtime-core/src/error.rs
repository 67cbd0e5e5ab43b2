//! Error types for the parameter-server master

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the parameter-server master
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Missing configuration key: {key}")]
    MissingConfigKey { key: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Unknown implementation class: {selector}")]
    UnknownModelClass { selector: String },

    // Batch errors
    #[error("Malformed batch: {input_rows} input rows vs {label_rows} label rows")]
    MalformedBatch { input_rows: usize, label_rows: usize },

    // Accumulation errors
    #[error("Cannot reduce an empty set of worker results")]
    EmptyReduction,

    #[error("Payload shape mismatch from worker {worker_id}: expected {expected}, got {actual}")]
    ShapeMismatch {
        worker_id: String,
        expected: usize,
        actual: usize,
    },

    // Coordination errors
    #[error("Unhandled message: {description}")]
    UnhandledMessage { description: String },

    #[error("Coordinator is not running (state: {state})")]
    NotRunning { state: String },

    // Checkpoint errors
    #[error("Checkpoint corrupted: {reason}")]
    CheckpointCorrupted { reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Channel errors
    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },
}

impl Error {
    /// Returns true if this error indicates a fatal condition
    ///
    /// Everything else is reported and the offending input dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingConfigKey { .. }
                | Error::InvalidConfig { .. }
                | Error::UnknownModelClass { .. }
        )
    }

    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingConfigKey { .. } | Error::InvalidConfig { .. } => "config",
            Error::UnknownModelClass { .. } => "model_class",
            Error::MalformedBatch { .. } => "batch_validation",
            Error::EmptyReduction | Error::ShapeMismatch { .. } => "accumulation",
            Error::UnhandledMessage { .. } => "unhandled",
            Error::NotRunning { .. } => "state",
            Error::CheckpointCorrupted { .. } => "checkpoint",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::ChannelClosed { .. } => "channel",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
