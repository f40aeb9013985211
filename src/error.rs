use thiserror::Error;

/// Session-level error taxonomy. Every terminal `connection.update` and every
/// failed `query` carries one of these; `status_code` mirrors the numeric
/// codes the service uses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection lost")]
    ConnectionLost,
    #[error("connection replaced by another session")]
    ConnectionReplaced,
    #[error("timed out")]
    Timeout,
    #[error("logged out")]
    LoggedOut,
    #[error("restart required")]
    RestartRequired,
    #[error("bad session")]
    BadSession,
    #[error("multi-device mismatch")]
    MultideviceMismatch,
    #[error("peer returned error {code}: {text}")]
    NodeError { code: u16, text: String },
}

impl WaError {
    pub fn status_code(&self) -> u16 {
        match self {
            WaError::ConnectionClosed => 428,
            WaError::ConnectionLost => 408,
            WaError::ConnectionReplaced => 440,
            WaError::Timeout => 408,
            WaError::LoggedOut => 401,
            WaError::RestartRequired => 515,
            WaError::BadSession => 500,
            WaError::MultideviceMismatch => 411,
            WaError::NodeError { code, .. } => *code,
        }
    }

    /// Whether the session can survive this error. Only per-request errors
    /// leave the connection up.
    pub fn is_fatal_for_session(&self) -> bool {
        !matches!(self, WaError::Timeout | WaError::NodeError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(WaError::ConnectionClosed.status_code(), 428);
        assert_eq!(WaError::ConnectionLost.status_code(), 408);
        assert_eq!(WaError::ConnectionReplaced.status_code(), 440);
        assert_eq!(WaError::LoggedOut.status_code(), 401);
        assert_eq!(WaError::RestartRequired.status_code(), 515);
        assert_eq!(WaError::BadSession.status_code(), 500);
        assert_eq!(WaError::MultideviceMismatch.status_code(), 411);
        assert_eq!(
            WaError::NodeError {
                code: 404,
                text: "item-not-found".to_string()
            }
            .status_code(),
            404
        );
    }

    #[test]
    fn test_fatality() {
        assert!(WaError::BadSession.is_fatal_for_session());
        assert!(!WaError::Timeout.is_fatal_for_session());
        assert!(!WaError::NodeError {
            code: 404,
            text: String::new()
        }
        .is_fatal_for_session());
    }
}
