use segue_engine::SegueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream error: {0}")]
    Stream(#[from] SegueError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broken pipe: consumer closed the connection")]
    BrokenPipe,
}

impl AppError {
    /// Whether a fresh session might get past this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Stream(e) if e.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
