//! Error types for Flake.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlakeError>;

#[derive(Error, Debug)]
pub enum FlakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("listen failed on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed on port {port}: {source}")]
    Accept {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("pid file {}: {source}", path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("variant on port {port} exited unexpectedly")]
    VariantExited { port: u16 },
}

impl FlakeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Port of the variant this error belongs to, if any
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Listen { port, .. }
            | Self::Accept { port, .. }
            | Self::VariantExited { port } => Some(*port),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_accept_error_keeps_source() {
        let err = FlakeError::Accept {
            port: 10010,
            source: io::Error::new(io::ErrorKind::Other, "listener gone"),
        };
        assert_eq!(err.port(), Some(10010));
        assert!(err.to_string().contains("listener gone"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error() {
        let err = FlakeError::config("no variants");
        assert_eq!(err.port(), None);
        assert_eq!(err.to_string(), "Invalid configuration: no variants");
    }
}
