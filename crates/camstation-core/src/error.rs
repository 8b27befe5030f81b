// ── Core error types ──
//
// The stream/connection failure taxonomy. Consumers never see HTTP status
// codes or XML parse failures directly; `From<camstation_api::Error>`
// folds transport-layer errors into these variants.
//
// Capacity pressure is deliberately absent: a request that does not fit
// under the stream ceiling is queued, not failed.

use thiserror::Error;

use crate::model::{CameraId, DeviceId, StreamKey};

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {target}: {reason}")]
    ConnectFailed { target: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Device unreachable after {failures} consecutive failures: {last_error}")]
    DeviceUnreachable { failures: u32, last_error: String },

    // ── Stream errors ────────────────────────────────────────────────
    #[error("Stream stalled: no frame within {timeout_secs}s")]
    StreamStalled { timeout_secs: u64 },

    #[error("Decode error: {message}")]
    DecodeError { message: String },

    #[error("No stream open for camera {camera}")]
    NotStreaming { camera: CameraId },

    #[error("Stream {key} failed and is waiting for a manual retry")]
    StreamFailed { key: StreamKey },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Unknown camera: {0}")]
    UnknownCamera(CameraId),

    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Station is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the bounded retry policy applies.
    ///
    /// Auth and decode failures are terminal for the attempt that hit them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::Timeout { .. } | Self::StreamStalled { .. }
        )
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailed { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<camstation_api::Error> for CoreError {
    fn from(err: camstation_api::Error) -> Self {
        if err.is_auth_failure() {
            return CoreError::AuthFailed {
                message: err.to_string(),
            };
        }
        match err {
            camstation_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else {
                    CoreError::ConnectFailed {
                        target: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), |u| u.to_string()),
                        reason: e.to_string(),
                    }
                }
            }
            camstation_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            camstation_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            camstation_api::Error::Tls(msg) => CoreError::ConnectFailed {
                target: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            camstation_api::Error::Isapi { status, message } if status >= 500 => {
                CoreError::ConnectFailed {
                    target: String::new(),
                    reason: format!("device error (HTTP {status}): {message}"),
                }
            }
            camstation_api::Error::Isapi { status, message } => CoreError::Unsupported {
                operation: format!("HTTP {status}: {message}"),
            },
            camstation_api::Error::Deserialization { message, .. } => {
                CoreError::Internal(format!("unexpected device response: {message}"))
            }
            camstation_api::Error::Authentication { message } => CoreError::AuthFailed { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_auth_errors_become_auth_failed() {
        let err: CoreError = camstation_api::Error::Isapi {
            status: 401,
            message: "Unauthorized".into(),
        }
        .into();
        assert!(err.is_auth_failure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn api_server_errors_are_retryable() {
        let err: CoreError = camstation_api::Error::Isapi {
            status: 503,
            message: "busy".into(),
        }
        .into();
        assert!(err.is_retryable());

        let err: CoreError = camstation_api::Error::Timeout { timeout_secs: 10 }.into();
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_errors_are_terminal() {
        let err = CoreError::DecodeError {
            message: "corrupt NAL".into(),
        };
        assert!(!err.is_retryable());
    }
}
