//! Control-plane commands: health probe, channel discovery, PTZ.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use camstation_core::{
    Camera, CameraId, ChannelInfo, CoreError, DeviceHealth, DeviceInfo, PtzCommand, StreamProfile,
};

use crate::cli::{ChannelsArgs, PtzArgs};
use crate::error::CliError;
use crate::output;

use super::{Context, util};

// ── Probe ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthView {
    device: String,
    state: String,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    retry_in_secs: Option<u64>,
    leases: usize,
    model: Option<String>,
    serial_number: Option<String>,
    firmware_version: Option<String>,
}

impl HealthView {
    fn new(device: &str, health: &DeviceHealth, info: Option<DeviceInfo>) -> Self {
        let info = info.unwrap_or_default();
        Self {
            device: device.to_owned(),
            model: info.model,
            serial_number: info.serial_number,
            firmware_version: info.firmware_version,
            state: health.state.to_string(),
            consecutive_failures: health.consecutive_failures,
            last_success: health.last_success,
            last_error: health.last_error.clone(),
            retry_in_secs: health.retry_in.map(|d| d.as_secs()),
            leases: health.leases,
        }
    }
}

fn health_detail(h: &HealthView, color: bool) -> String {
    let mut lines = vec![format!("Device:       {}", h.device)];
    for (label, value) in [
        ("Model:       ", &h.model),
        ("Serial:      ", &h.serial_number),
        ("Firmware:    ", &h.firmware_version),
    ] {
        if let Some(value) = value {
            lines.push(format!("{label} {value}"));
        }
    }
    lines.extend([
        format!("State:        {}", output::paint_state(&h.state, color)),
        format!("Failures:     {}", h.consecutive_failures),
        format!(
            "Last success: {}",
            h.last_success
                .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        ),
    ]);
    if let Some(ref err) = h.last_error {
        lines.push(format!("Last error:   {err}"));
    }
    if let Some(secs) = h.retry_in_secs {
        lines.push(format!("Retry in:     {secs}s"));
    }
    lines.join("\n")
}

pub async fn probe(ctx: &Context<'_>, device: &str) -> Result<(), CliError> {
    let d = util::resolve_device(ctx.station, device)?;
    let health = ctx.station.probe(&d.id).await?;
    // RTSP-only devices cannot describe themselves.
    let info = match ctx.station.device_info(&d.id).await {
        Ok(info) => Some(info),
        Err(CoreError::Unsupported { .. }) => None,
        Err(e) => return Err(e.into()),
    };
    let view = HealthView::new(device, &health, info);
    let color = output::should_color(ctx.global.color);
    let out = output::render_single(
        ctx.global.output,
        &view,
        |h| health_detail(h, color),
        |h| h.state.clone(),
    )?;
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

// ── Channels ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChannelView {
    channel: u32,
    name: String,
    enabled: bool,
    registered_as: Option<String>,
}

#[derive(Tabled)]
struct ChannelRow {
    #[tabled(rename = "Ch")]
    channel: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Camera")]
    camera: String,
}

impl From<&ChannelView> for ChannelRow {
    fn from(c: &ChannelView) -> Self {
        Self {
            channel: c.channel,
            name: c.name.clone(),
            enabled: if c.enabled { "yes" } else { "no" }.into(),
            camera: c.registered_as.clone().unwrap_or_else(|| "-".into()),
        }
    }
}

pub async fn channels(ctx: &Context<'_>, args: ChannelsArgs) -> Result<(), CliError> {
    let d = util::resolve_device(ctx.station, &args.device)?;
    let discovered: Vec<ChannelInfo> = ctx.station.list_channels(&d.id).await?;

    let mut views = Vec::with_capacity(discovered.len());
    let mut imported = 0usize;
    for info in discovered {
        let mut registered_as = ctx
            .station
            .catalog()
            .cameras_for(&d.id)
            .iter()
            .find(|c| c.channel == info.channel)
            .map(|c| c.id.to_string());

        if args.import && registered_as.is_none() && info.enabled {
            let id = format!("{}-ch{}", d.id, info.channel);
            ctx.station
                .add_camera(Camera {
                    id: CameraId::from(id.as_str()),
                    device: d.id.clone(),
                    channel: info.channel,
                    name: info.name.clone(),
                    preferred_profile: StreamProfile::Sub,
                    main_path: None,
                    sub_path: None,
                })
                .await?;
            imported += 1;
            registered_as = Some(id);
        }

        views.push(ChannelView {
            channel: info.channel,
            name: info.name,
            enabled: info.enabled,
            registered_as,
        });
    }

    let out = output::render_list(
        ctx.global.output,
        &views,
        |c| ChannelRow::from(c),
        |c| c.channel.to_string(),
    )?;
    output::print_output(&out, ctx.global.quiet);
    if args.import {
        util::notice(ctx.global.quiet, &format!("Imported {imported} camera(s)"));
    }
    Ok(())
}

// ── PTZ ─────────────────────────────────────────────────────────────

fn ptz_command(args: &PtzArgs) -> PtzCommand {
    if let Some(preset) = args.preset {
        PtzCommand::GotoPreset(preset)
    } else if args.stop {
        PtzCommand::Stop
    } else {
        PtzCommand::Move {
            pan: args.pan.unwrap_or(0),
            tilt: args.tilt.unwrap_or(0),
            zoom: args.zoom.unwrap_or(0),
        }
    }
}

pub async fn ptz(ctx: &Context<'_>, args: PtzArgs) -> Result<(), CliError> {
    let camera = util::resolve_camera(ctx.station, &args.camera)?;
    let command = ptz_command(&args);
    tracing::debug!(camera = %camera.id, ?command, "sending PTZ command");
    ctx.station.ptz(&camera.id, command).await?;
    util::notice(ctx.global.quiet, "PTZ command sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pan: Option<i8>, preset: Option<u32>, stop: bool) -> PtzArgs {
        PtzArgs {
            camera: "gate".into(),
            pan,
            tilt: None,
            zoom: None,
            preset,
            stop,
        }
    }

    #[test]
    fn ptz_flags_map_to_commands() {
        assert_eq!(
            ptz_command(&args(Some(-40), None, false)),
            PtzCommand::Move {
                pan: -40,
                tilt: 0,
                zoom: 0
            }
        );
        assert_eq!(ptz_command(&args(None, Some(3), false)), PtzCommand::GotoPreset(3));
        assert_eq!(ptz_command(&args(None, None, true)), PtzCommand::Stop);
    }
}
