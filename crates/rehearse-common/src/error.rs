pub mod backend_error {
    use thiserror::Error;

    /// Errors raised by a browser-driving backend or one of its element contexts.
    #[derive(Debug, Error)]
    pub enum BackendError {
        #[error("Backend not ready")]
        NotReady,

        #[error("Navigation failed: {0}")]
        Navigation(String),

        #[error("Script error: {0}")]
        ScriptError(String),

        #[error("Stale element: {0}")]
        StaleElement(String),

        #[error("Context unavailable: {0}")]
        ContextUnavailable(String),

        #[error("Operation timed out: {0}")]
        Timeout(String),

        #[error("Not supported: {0}")]
        NotSupported(String),

        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Backend error: {0}")]
        Other(String),
    }
}

pub use backend_error::BackendError;
