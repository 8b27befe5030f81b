//! Camera command handlers.

use std::sync::Arc;

use tabled::Tabled;

use camstation_core::{Camera, CameraId, StreamProfile};

use crate::cli::{CameraAddArgs, CamerasArgs, CamerasCommand, ProfileArg};
use crate::error::CliError;
use crate::output;

use super::{Context, util};

#[derive(Tabled)]
struct CameraRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Ch")]
    channel: u32,
    #[tabled(rename = "Profile")]
    profile: String,
}

impl From<&Arc<Camera>> for CameraRow {
    fn from(c: &Arc<Camera>) -> Self {
        Self {
            id: c.id.to_string(),
            name: c.name.clone(),
            device: c.device.to_string(),
            channel: c.channel,
            profile: c.preferred_profile.to_string(),
        }
    }
}

pub async fn handle(ctx: &Context<'_>, args: CamerasArgs) -> Result<(), CliError> {
    let global = ctx.global;
    match args.command {
        CamerasCommand::List { device } => {
            let cameras: Vec<Arc<Camera>> = match device {
                Some(device) => {
                    let d = util::resolve_device(ctx.station, &device)?;
                    ctx.station.catalog().cameras_for(&d.id)
                }
                None => ctx.station.catalog().cameras().to_vec(),
            };
            let out = output::render_list(
                global.output,
                &cameras,
                |c| CameraRow::from(c),
                |c| c.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        CamerasCommand::Add(add) => add_camera(ctx, add).await,

        CamerasCommand::Remove { camera } => {
            let c = util::resolve_camera(ctx.station, &camera)?;
            if !util::confirm(&format!("Remove camera {camera}?"), global.yes)? {
                return Ok(());
            }
            ctx.station.remove_camera(&c.id).await?;
            util::notice(global.quiet, "Camera removed");
            Ok(())
        }
    }
}

async fn add_camera(ctx: &Context<'_>, add: CameraAddArgs) -> Result<(), CliError> {
    let device = util::resolve_device(ctx.station, &add.device)?;
    if add.channel == 0 {
        return Err(CliError::Validation {
            field: "channel".into(),
            reason: "channels are numbered from 1".into(),
        });
    }
    let camera = Camera {
        id: CameraId::from(add.id.as_str()),
        device: device.id.clone(),
        channel: add.channel,
        name: add
            .name
            .unwrap_or_else(|| format!("{} channel {}", device.name, add.channel)),
        preferred_profile: match add.profile {
            ProfileArg::Main => StreamProfile::Main,
            ProfileArg::Sub => StreamProfile::Sub,
        },
        main_path: add.main_path,
        sub_path: add.sub_path,
    };
    ctx.station.add_camera(camera).await?;
    util::notice(ctx.global.quiet, &format!("Camera {} saved", add.id));
    Ok(())
}
