//! Error types for the reconciliation engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during a synchronization run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Remote service error.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote has no data ready yet for a block or block-data call.
    ///
    /// Transient: callers retry in a loop and never surface it.
    #[error("remote data not ready")]
    NotReady,

    /// Protocol violation in the metadata stream.
    ///
    /// Fatal: the stream cannot be trusted past this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The session is unknown or has expired on the remote.
    #[error("unknown session {0}")]
    UnknownSession(String),

    /// Local filesystem error.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// Path the operation targeted.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Payload failed to decompress.
    #[error("corrupt payload for {path}")]
    CorruptPayload {
        /// Remote path of the affected file.
        path: String,
    },

    /// A background stage failed; the run was aborted at the next
    /// checkpoint with the original failure preserved as cause.
    #[error("synchronization failed")]
    Aborted {
        /// The failure that triggered the abort.
        #[source]
        cause: Box<EngineError>,
    },
}

impl EngineError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Wraps an I/O error with the path it occurred on.
    pub fn filesystem(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Wraps a background failure for the abort path.
    pub fn aborted(cause: EngineError) -> Self {
        Self::Aborted {
            cause: Box::new(cause),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Remote { retryable, .. } => *retryable,
            EngineError::NotReady => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn retryable_errors() {
        assert!(EngineError::remote_retryable("busy").is_retryable());
        assert!(!EngineError::remote_fatal("bad request").is_retryable());
        assert!(EngineError::NotReady.is_retryable());
        assert!(!EngineError::Protocol("bad back-ref".into()).is_retryable());
    }

    #[test]
    fn aborted_preserves_cause() {
        let cause = EngineError::remote_fatal("connection reset");
        let aborted = EngineError::aborted(cause);

        assert_eq!(aborted.to_string(), "synchronization failed");
        let source = aborted.source().expect("cause");
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn filesystem_error_names_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = EngineError::filesystem("/tmp/a.txt", io);
        assert!(err.to_string().contains("/tmp/a.txt"));
    }
}
