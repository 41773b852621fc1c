//! Service error types.

use thiserror::Error;

/// Errors produced while running the HTTP service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The configured bind address could not be parsed.
    #[error("invalid bind address: {0}")]
    InvalidBind(String),

    /// Underlying I/O error (bind, accept).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ServiceError::InvalidBind("nowhere".into());
        assert_eq!(err.to_string(), "invalid bind address: nowhere");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        let err: ServiceError = io_err.into();
        assert!(matches!(err, ServiceError::Io(_)));
    }
}
