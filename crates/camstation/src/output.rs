//! Rendering for `--output`.
//!
//! Tables are for people, JSON is for scripts, and `plain` prints bare ids
//! so results can be piped into another `camstation` invocation.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color ────────────────────────────────────────────────────────────

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Never => false,
        ColorMode::Always => true,
        ColorMode::Auto => std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal(),
    }
}

/// Severity color for a connection-state label.
pub fn paint_state(label: &str, color: bool) -> String {
    if !color {
        return label.to_owned();
    }
    if label.starts_with("healthy") {
        label.green().to_string()
    } else if label.starts_with("degraded") || label.starts_with("connecting") {
        label.yellow().to_string()
    } else if label.starts_with("offline") || label.starts_with("auth") {
        label.red().to_string()
    } else {
        label.to_owned()
    }
}

// ── Rendering ────────────────────────────────────────────────────────

/// JSON for the two machine formats, `None` for the human ones.
fn as_json<T: Serialize + ?Sized>(format: OutputFormat, data: &T) -> Result<Option<String>, CliError> {
    let json = match format {
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Table | OutputFormat::Plain => return Ok(None),
    };
    Ok(Some(json))
}

/// A collection: one row per item as a table, one id per line as plain.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: Serialize,
    R: Tabled,
{
    if let Some(json) = as_json(format, data)? {
        return Ok(json);
    }
    Ok(if format == OutputFormat::Plain {
        data.iter().map(id_fn).collect::<Vec<_>>().join("\n")
    } else {
        Table::new(data.iter().map(to_row))
            .with(Style::rounded())
            .to_string()
    })
}

/// One record. The table form is a hand-laid `key: value` block.
pub fn render_single<T: Serialize>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError> {
    if let Some(json) = as_json(format, data)? {
        return Ok(json);
    }
    Ok(if format == OutputFormat::Plain {
        id_fn(data)
    } else {
        detail_fn(data)
    })
}

/// Write to stdout unless `--quiet` or there is nothing to say.
pub fn print_output(output: &str, quiet: bool) {
    if !quiet && !output.is_empty() {
        let _ = writeln!(io::stdout().lock(), "{output}");
    }
}
