use realtime_client::{ConnectionError, RealtimeError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("realtime error: {0}")]
    Connection(#[from] RealtimeError),

    /// The host refused or failed to display a system alert
    #[error("alert failed: {0}")]
    AlertFailed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ConnectionError> for SyncError {
    fn from(err: ConnectionError) -> Self {
        SyncError::Connection(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_wraps() {
        let err: SyncError = ConnectionError::Protocol("denied".into()).into();
        assert!(matches!(err, SyncError::Connection(RealtimeError::Connection(_))));
        assert_eq!(
            err.to_string(),
            "realtime error: broker rejected connection: denied"
        );
    }
}
