use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the windowing, extraction and detector stages.
///
/// Degenerate numeric cases (empty series, zero variance, empty spectrum) are
/// never reported here; they resolve to 0.0 inside the feature code.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No windows produced, check window_size/step_size against the stream lengths")]
    NoWindows,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Model serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Metrics serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }
}
