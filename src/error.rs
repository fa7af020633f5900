use thiserror::Error;

/// Unified error type for pacgen
#[derive(Error, Debug)]
pub enum PacError {
    // Source errors
    #[error("Source {source_name} fetch failed: {message}")]
    SourceFetch {
        source_name: String,
        message: String,
    },

    // Proxy errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Unexpected probe status: expected {expected}, got {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },

    #[error("Operation timed out")]
    Timeout,

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Run-level errors
    #[error("Probe task failed: {0}")]
    ProbeTask(String),

    #[error("Pipeline run exceeded {secs}s")]
    RunTimeout { secs: u64 },

    #[error("No live proxies found")]
    NoLiveProxies,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pacgen operations
pub type Result<T> = std::result::Result<T, PacError>;

impl PacError {
    /// Errors that end the run instead of degrading it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PacError::ProbeTask(_)
                | PacError::RunTimeout { .. }
                | PacError::NoLiveProxies
                | PacError::InvalidConfig(_)
                | PacError::Io(_)
        )
    }

    /// Errors a probe attempt may recover from by retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PacError::ProxyConnectionFailed(_)
                | PacError::UnexpectedStatus { .. }
                | PacError::Timeout
                | PacError::Http(_)
        )
    }
}

// Convert from hyper errors
impl From<hyper::Error> for PacError {
    fn from(err: hyper::Error) -> Self {
        PacError::Http(err.to_string())
    }
}
