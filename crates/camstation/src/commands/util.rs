//! Lookups and prompts used by more than one command.

use std::io::IsTerminal;
use std::sync::Arc;

use camstation_core::{Camera, CameraId, Device, DeviceId, Station};

use crate::error::CliError;

pub fn resolve_device(station: &Station, identifier: &str) -> Result<Arc<Device>, CliError> {
    station
        .catalog()
        .device(&DeviceId::from(identifier))
        .ok_or_else(|| CliError::not_found("device", identifier.into()))
}

pub fn resolve_camera(station: &Station, identifier: &str) -> Result<Arc<Camera>, CliError> {
    station
        .catalog()
        .camera(&CameraId::from(identifier))
        .ok_or_else(|| CliError::not_found("camera", identifier.into()))
}

/// Ask before a destructive change. `--yes` answers for the user.
pub fn confirm(message: &str, assume_yes: bool) -> Result<bool, CliError> {
    if assume_yes {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// Print a status line to stderr unless `--quiet`.
pub fn notice(quiet: bool, message: &str) {
    if !quiet {
        eprintln!("{message}");
    }
}
