mod cli;
mod commands;
mod error;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use camstation_config::{Config, TomlDeviceStore};
use camstation_core::{
    Collaborators, CoreError, DecodeSession, Decoder, IsapiControlPlane, Station, StreamSource,
};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// `RUST_LOG` wins over `-v`. Logs go to stderr so stdout stays parseable.
fn init_tracing(verbosity: u8) {
    let default_level = ["warn", "info", "debug"]
        .get(usize::from(verbosity))
        .copied()
        .unwrap_or("trace");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config inspection works without device records
        Command::Config(args) => commands::config_cmd::handle(&args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "camstation", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let config = load_config(&cli.global)?;
            let station = start_station(&config).await?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let ctx = commands::Context {
                station: &station,
                config: &config,
                global: &cli.global,
            };
            let result = commands::dispatch(cmd, &ctx).await;
            station.shutdown().await;
            result
        }
    }
}

/// Path of the config file in effect: `--config` or the platform default.
pub(crate) fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(camstation_config::config_path)
}

/// Load the config and apply command-line overrides.
pub(crate) fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut config = camstation_config::load_config_from(&config_file(global))?;
    if let Some(ref path) = global.devices_file {
        config.devices_file = Some(path.clone());
    }
    if let Some(timeout) = global.timeout {
        config.defaults.request_timeout = timeout;
    }
    Ok(config)
}

async fn start_station(config: &Config) -> Result<Station, CliError> {
    let station_config = config.station_config()?;
    let store = TomlDeviceStore::new(config.devices_path());
    tracing::debug!(records = %store.path().display(), "loading device records");

    let station = Station::start(
        station_config,
        Collaborators {
            control: Arc::new(IsapiControlPlane::new(config.transport_config())),
            credentials: Arc::new(config.credential_source()),
            decoder: Arc::new(NoDecoder),
            repository: Arc::new(store),
        },
    )
    .await?;
    Ok(station)
}

/// The CLI manages devices; it never decodes video.
struct NoDecoder;

#[async_trait]
impl Decoder for NoDecoder {
    async fn open(&self, _source: &StreamSource) -> Result<Box<dyn DecodeSession>, CoreError> {
        Err(CoreError::Unsupported {
            operation: "video decoding".into(),
        })
    }
}
