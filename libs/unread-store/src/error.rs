use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Failures of the backing key-value store
///
/// The unread store itself never returns these; it logs them and keeps the
/// in-memory counts authoritative.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(err.to_string(), "storage I/O error: read-only");
    }
}
