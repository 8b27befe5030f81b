use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to a device's ISAPI endpoint.
///
/// `camstation-core` folds these into its own connection errors; the
/// predicates below are what it branches on.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials refused, either by HTTP status or by a
    /// `<ResponseStatus>` body that reports 401 behind a 200.
    #[error("device rejected credentials: {message}")]
    Authentication { message: String },

    #[error("device unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bad device address: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("device did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// CA bundle unreadable, or the HTTP client could not be built.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The device answered with a non-2xx status.
    #[error("ISAPI request failed with status {status}: {message}")]
    Isapi { status: u16, message: String },

    /// The XML body did not match the expected schema. `body` keeps the
    /// raw payload for trace logs.
    #[error("unexpected ISAPI payload: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Whether the credentials are wrong. Never retried.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Isapi { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    /// Whether a later attempt may succeed: network trouble, timeouts and
    /// device-side 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Timeout { .. } => true,
            Self::Isapi { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the endpoint does not exist on this model.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Isapi { status, .. } => *status == StatusCode::NOT_FOUND.as_u16(),
            Self::Transport(e) => e.status() == Some(StatusCode::NOT_FOUND),
            _ => false,
        }
    }
}
