//! Config command handlers. These run without starting the station.

use camstation_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

/// Copy of the config with every plaintext password masked.
fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    for entry in shown.credentials.values_mut() {
        if entry.password.is_some() {
            entry.password = Some(REDACTED.into());
        }
    }
    shown
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&crate::config_file(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let config = redacted(&crate::load_config(global)?);
            let out = match global.output {
                OutputFormat::Json => serde_json::to_string_pretty(&config)?,
                OutputFormat::JsonCompact => serde_json::to_string(&config)?,
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&config)
                    .map_err(|e| CliError::Internal(format!("config serialization: {e}")))?,
            };
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }
    }
}
