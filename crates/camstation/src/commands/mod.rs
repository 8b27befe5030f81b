//! Command dispatch: bridges CLI args -> station operations -> output formatting.

pub mod cameras;
pub mod config_cmd;
pub mod device_ops;
pub mod devices;
pub mod util;

use camstation_config::Config;
use camstation_core::Station;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Everything a station-bound handler needs.
pub struct Context<'a> {
    pub station: &'a Station,
    pub config: &'a Config,
    pub global: &'a GlobalOpts,
}

/// Dispatch a station-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context<'_>) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(ctx, args).await,
        Command::Cameras(args) => cameras::handle(ctx, args).await,
        Command::Probe { device } => device_ops::probe(ctx, &device).await,
        Command::Channels(args) => device_ops::channels(ctx, args).await,
        Command::Ptz(args) => device_ops::ptz(ctx, args).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
