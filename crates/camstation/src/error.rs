//! Everything `camstation` can fail with, rendered through miette.
//!
//! Core and config errors are folded into these so that every failure
//! carries a diagnostic code, a help line and a stable exit status.

use miette::Diagnostic;
use thiserror::Error;

use camstation_config::ConfigError;
use camstation_core::CoreError;

/// Exit status per failure class. 6 is unused.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {target}")]
    #[diagnostic(
        code(camstation::connection_failed),
        help(
            "Check that the device is powered and reachable.\n\
             Reason: {reason}\n\
             Try: camstation probe <device> -v"
        )
    )]
    ConnectionFailed { target: String, reason: String },

    #[error("Device unreachable after {failures} consecutive failures")]
    #[diagnostic(
        code(camstation::device_unreachable),
        help("Last error: {last_error}")
    )]
    Unreachable { failures: u32, last_error: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Device refused the credentials: {message}")]
    #[diagnostic(
        code(camstation::auth_failed),
        help(
            "Verify the credentials the device references.\n\
             Store a password with: camstation devices add <id> --host <host> -u <user> --ask-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for '{reference}'")]
    #[diagnostic(
        code(camstation::no_credentials),
        help(
            "Add a [credentials.{reference}] table to your config,\n\
             or store a password with --ask-password."
        )
    )]
    NoCredentials { reference: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("No {resource_type} named '{identifier}'")]
    #[diagnostic(
        code(camstation::not_found),
        help("Run: camstation {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Device behavior ──────────────────────────────────────────────
    #[error("Operation '{operation}' is not supported")]
    #[diagnostic(
        code(camstation::unsupported),
        help("Generic RTSP cameras have no control plane; PTZ and discovery need ISAPI.")
    )]
    Unsupported { operation: String },

    #[error("Stream error: {message}")]
    #[diagnostic(code(camstation::stream))]
    Stream { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("{field}: {reason}")]
    #[diagnostic(code(camstation::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(camstation::config),
        help("Check the config file shown by: camstation config path")
    )]
    Config(ConfigError),

    #[error("Device records could not be stored: {message}")]
    #[diagnostic(code(camstation::persistence))]
    Persistence { message: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Refusing to '{action}' without a terminal to confirm on")]
    #[diagnostic(
        code(camstation::confirmation_required),
        help("Pass --yes when running from a script.")
    )]
    NonInteractiveRequiresYes { action: String },

    #[error("Device gave no answer within {seconds}s")]
    #[diagnostic(
        code(camstation::timeout),
        help("Slow NVRs may need a larger --timeout.")
    )]
    Timeout { seconds: u64 },

    #[error("{0}")]
    #[diagnostic(code(camstation::internal))]
    Internal(String),

    // ── Local I/O ────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not serialize output: {0}")]
    #[diagnostic(code(camstation::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn not_found(resource_type: &str, identifier: String) -> Self {
        let list_command = match resource_type {
            "camera" => "cameras list",
            _ => "devices list",
        };
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier,
            list_command: list_command.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectFailed { target, reason } => {
                CliError::ConnectionFailed { target, reason }
            }

            CoreError::DeviceUnreachable {
                failures,
                last_error,
            } => CliError::Unreachable {
                failures,
                last_error,
            },

            CoreError::AuthFailed { message } => CliError::AuthFailed { message },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::UnknownDevice(id) => CliError::not_found("device", id.to_string()),
            CoreError::UnknownCamera(id) => CliError::not_found("camera", id.to_string()),

            CoreError::Unsupported { operation } => CliError::Unsupported { operation },

            err @ (CoreError::StreamStalled { .. }
            | CoreError::DecodeError { .. }
            | CoreError::NotStreaming { .. }
            | CoreError::StreamFailed { .. }) => CliError::Stream {
                message: err.to_string(),
            },

            CoreError::Persistence { message } => CliError::Persistence { message },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::ShuttingDown => CliError::Internal("station is shutting down".into()),

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { reference } => CliError::NoCredentials { reference },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
