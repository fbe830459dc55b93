//! Error types for termgate-core.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for termgate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad or missing credential material. Fatal at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The listening endpoint could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Client certificate missing or not trusted.
    #[error("authentication rejected: {reason}")]
    AuthRejected { reason: String },

    /// Operation attempted after the session ended.
    #[error("session closed")]
    SessionClosed,

    /// Protocol violation or unexpected message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Codec error during encoding/decoding.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Transport layer error.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Returns true if this error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Bind { .. })
    }

    /// Returns true if this error only ends the session it occurred in.
    pub fn is_session_local(&self) -> bool {
        matches!(
            self,
            Error::SessionClosed
                | Error::Protocol { .. }
                | Error::Codec { .. }
                | Error::Transport { .. }
                | Error::Timeout
        )
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

/// Convenience result type for termgate operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = Error::Config {
            message: "no private key found".into(),
        };
        assert_eq!(err.to_string(), "configuration error: no private key found");
    }

    #[test]
    fn error_display_bind() {
        let err = Error::Bind {
            addr: "127.0.0.1:8022".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:8022: in use");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::config("bad key").is_fatal());
        assert!(Error::Bind {
            addr: "0.0.0.0:0".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
        .is_fatal());

        assert!(!Error::SessionClosed.is_fatal());
        assert!(!Error::AuthRejected {
            reason: "untrusted".into()
        }
        .is_fatal());
    }

    #[test]
    fn session_local_errors() {
        assert!(Error::SessionClosed.is_session_local());
        assert!(Error::Timeout.is_session_local());
        assert!(Error::Codec {
            message: "bad frame".into()
        }
        .is_session_local());

        // Auth rejection never reaches a session
        assert!(!Error::AuthRejected {
            reason: "untrusted".into()
        }
        .is_session_local());
        assert!(!Error::config("missing").is_session_local());
    }
}
