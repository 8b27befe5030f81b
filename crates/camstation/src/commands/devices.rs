//! Device command handlers.

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tabled::Tabled;

use camstation_config::{CredentialEntry, credentials::store_in_keyring};
use camstation_core::{
    Camera, CredentialsRef, Device, DeviceId, DeviceIdentity, DeviceProtocol, Station, Transport,
};

use crate::cli::{DeviceAddArgs, DevicesArgs, DevicesCommand, ProtocolArg};
use crate::error::CliError;
use crate::output;

use super::{Context, util};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "RTSP")]
    rtsp_port: u16,
    #[tabled(rename = "Cameras")]
    cameras: usize,
}

fn row(station: &Station, d: &Arc<Device>) -> DeviceRow {
    DeviceRow {
        id: d.id.to_string(),
        name: d.name.clone(),
        protocol: d.protocol().to_string(),
        address: format!("{}://{}", d.identity.transport, d.identity),
        rtsp_port: d.rtsp_port,
        cameras: station.catalog().cameras_for(&d.id).len(),
    }
}

/// Device record plus the cameras hanging off it.
#[derive(Serialize)]
struct DeviceView {
    #[serde(flatten)]
    device: Device,
    cameras: Vec<Camera>,
}

fn detail(v: &DeviceView) -> String {
    let d = &v.device;
    let mut lines = vec![
        format!("ID:          {}", d.id),
        format!("Name:        {}", d.name),
        format!("Protocol:    {}", d.protocol()),
        format!("Address:     {}://{}", d.identity.transport, d.identity),
        format!("RTSP port:   {}", d.rtsp_port),
        format!("Credentials: {}", d.identity.credentials),
    ];
    if v.cameras.is_empty() {
        lines.push("Cameras:     -".into());
    } else {
        lines.push("Cameras:".into());
        for c in &v.cameras {
            lines.push(format!("  {:>3}  {}  ({})", c.channel, c.id, c.name));
        }
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context<'_>, args: DevicesArgs) -> Result<(), CliError> {
    let global = ctx.global;
    match args.command {
        DevicesCommand::List => {
            let devices = ctx.station.catalog().devices();
            let out = output::render_list(
                global.output,
                devices.as_slice(),
                |d| row(ctx.station, d),
                |d| d.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Show { device } => {
            let d = util::resolve_device(ctx.station, &device)?;
            let view = DeviceView {
                device: (*d).clone(),
                cameras: ctx
                    .station
                    .catalog()
                    .cameras_for(&d.id)
                    .iter()
                    .map(|c| (**c).clone())
                    .collect(),
            };
            let out = output::render_single(global.output, &view, detail, |v| {
                v.device.id.to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Add(add) => add_device(ctx, add).await,

        DevicesCommand::Remove { device } => {
            let d = util::resolve_device(ctx.station, &device)?;
            let cameras = ctx.station.catalog().cameras_for(&d.id).len();
            let prompt = if cameras == 0 {
                format!("Remove device {device}?")
            } else {
                format!("Remove device {device} and its {cameras} camera(s)?")
            };
            if !util::confirm(&prompt, global.yes)? {
                return Ok(());
            }
            ctx.station.remove_device(&d.id).await?;
            util::notice(global.quiet, "Device removed");
            Ok(())
        }
    }
}

async fn add_device(ctx: &Context<'_>, add: DeviceAddArgs) -> Result<(), CliError> {
    let reference = add.credentials.clone().unwrap_or_else(|| add.id.clone());

    if let Some(ref username) = add.username {
        remember_username(ctx, &reference, username)?;
        if add.ask_password {
            let password = rpassword::prompt_password(format!("Password for {username}: "))?;
            store_in_keyring(&reference, &SecretString::from(password))?;
            util::notice(ctx.global.quiet, "Password stored in the system keyring");
        }
    }

    let device = Device {
        id: DeviceId::from(add.id.as_str()),
        name: add.name.unwrap_or_else(|| add.id.clone()),
        identity: DeviceIdentity {
            host: add.host,
            port: add.port,
            transport: if add.https {
                Transport::Https
            } else {
                Transport::Http
            },
            protocol: match add.protocol {
                ProtocolArg::Isapi => DeviceProtocol::Isapi,
                ProtocolArg::Rtsp => DeviceProtocol::Rtsp,
            },
            credentials: CredentialsRef::from(reference),
        },
        rtsp_port: add.rtsp_port,
    };
    ctx.station.add_device(device).await?;
    util::notice(ctx.global.quiet, &format!("Device {} saved", add.id));
    Ok(())
}

/// Record `[credentials.<reference>]` in the config file, keeping any
/// password source already configured there.
fn remember_username(ctx: &Context<'_>, reference: &str, username: &str) -> Result<(), CliError> {
    let path = crate::config_file(ctx.global);
    let mut on_disk = camstation_config::load_config_from(&path)?;
    let entry = on_disk
        .credentials
        .entry(reference.to_owned())
        .or_insert_with(|| CredentialEntry {
            username: username.to_owned(),
            password: None,
            password_env: None,
        });
    if entry.username == username && ctx.config.credentials.contains_key(reference) {
        return Ok(());
    }
    entry.username = username.to_owned();
    camstation_config::save_config_to(&on_disk, &path)?;
    tracing::debug!(reference, path = %path.display(), "credentials entry saved");
    Ok(())
}
