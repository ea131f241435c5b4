use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum SegueError {
    #[error("stream is not open")]
    NotOpen,

    #[error("stream is already open on `{uri}`")]
    AlreadyOpen { uri: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },
}

impl SegueError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    /// Whether reopening the session has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotOpen
            | Self::AlreadyOpen { .. }
            | Self::InvalidUrl { .. }
            | Self::Configuration { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::NOT_FOUND
            }
            Self::Network { .. } | Self::Io { .. } | Self::Timeout { .. } => true,
        }
    }
}
