//! Error types for the execution pipeline

use thiserror::Error;

/// Result type alias using the pipeline's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Failures the pipeline reports to its caller.
///
/// Launch failures and timeouts are not here: they are outcomes of a run and
/// come back inside an `ExecutionResult`.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested language has no registered runtime (client error)
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The job workspace could not be prepared
    #[error("Workspace error: {message}")]
    Workspace {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid runtime table or settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// The container runtime could not be reached
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl Error {
    pub(crate) fn workspace(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Workspace {
            message: message.into(),
            source,
        }
    }

    /// True for errors caused by the caller's input rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::UnsupportedLanguage(_))
    }
}
