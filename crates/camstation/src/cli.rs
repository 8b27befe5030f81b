//! Command-line surface of `camstation`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Root ─────────────────────────────────────────────────────────────

/// camstation -- manage NVRs, IP cameras and their channels
#[derive(Debug, Parser)]
#[command(
    name = "camstation",
    version,
    about = "Manage CCTV devices and cameras from the command line",
    long_about = "Registers NVRs and IP cameras, checks their health through the\n\
        connection pool, discovers channels and drives PTZ.\n\n\
        Devices speaking Hikvision ISAPI get a full control plane; generic\n\
        RTSP cameras are stream-only.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Flags accepted by every command ──────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "CAMSTATION_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Device record file (overrides the config)
    #[arg(long, env = "CAMSTATION_DEVICES_FILE", global = true)]
    pub devices_file: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CAMSTATION_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Colorize state columns
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Answer yes to every confirmation
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Request timeout in seconds (overrides the config)
    #[arg(long, env = "CAMSTATION_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Value enums ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    /// JSON on a single line
    JsonCompact,
    /// Bare ids, one per line
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Color when stdout is a terminal and `NO_COLOR` is unset
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProtocolArg {
    /// Hikvision ISAPI NVR or camera
    Isapi,
    /// Generic RTSP camera, no control plane
    Rtsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfileArg {
    Main,
    Sub,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage registered NVRs and cameras
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Manage camera channels
    #[command(alias = "cam", alias = "c")]
    Cameras(CamerasArgs),

    /// Authenticate, run one health probe and show model and firmware
    Probe {
        /// Device ID
        device: String,
    },

    /// Discover camera channels on a device
    Channels(ChannelsArgs),

    /// Pan, tilt, zoom or recall a preset
    Ptz(PtzArgs),

    /// Inspect configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List registered devices
    #[command(alias = "ls")]
    List,

    /// Show device details and its cameras
    Show {
        /// Device ID
        device: String,
    },

    /// Register a device, or update an existing one
    Add(DeviceAddArgs),

    /// Remove a device and all of its cameras
    #[command(alias = "rm")]
    Remove {
        /// Device ID
        device: String,
    },
}

#[derive(Debug, Args)]
pub struct DeviceAddArgs {
    /// Device ID (stable, chosen by you)
    pub id: String,

    /// Hostname or IP address
    #[arg(long)]
    pub host: String,

    /// Control-plane port
    #[arg(long, default_value = "80")]
    pub port: u16,

    /// Use HTTPS for the control plane
    #[arg(long)]
    pub https: bool,

    /// Device protocol
    #[arg(long, default_value = "isapi")]
    pub protocol: ProtocolArg,

    /// RTSP port
    #[arg(long, default_value = "554")]
    pub rtsp_port: u16,

    /// Display name (defaults to the ID)
    #[arg(long)]
    pub name: Option<String>,

    /// Credentials reference (defaults to the ID)
    #[arg(long)]
    pub credentials: Option<String>,

    /// Username to store under the credentials reference
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// Prompt for a password and store it in the system keyring
    #[arg(long, requires = "username")]
    pub ask_password: bool,
}

// ── Cameras ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CamerasArgs {
    #[command(subcommand)]
    pub command: CamerasCommand,
}

#[derive(Debug, Subcommand)]
pub enum CamerasCommand {
    /// List cameras
    #[command(alias = "ls")]
    List {
        /// Only cameras on this device
        #[arg(long)]
        device: Option<String>,
    },

    /// Add a camera channel, or update an existing one
    Add(CameraAddArgs),

    /// Remove a camera
    #[command(alias = "rm")]
    Remove {
        /// Camera ID
        camera: String,
    },
}

#[derive(Debug, Args)]
pub struct CameraAddArgs {
    /// Camera ID
    pub id: String,

    /// Owning device ID
    #[arg(long)]
    pub device: String,

    /// Channel number on the device
    #[arg(long)]
    pub channel: u32,

    /// Display name
    #[arg(long)]
    pub name: Option<String>,

    /// Profile to prefer when showing this camera
    #[arg(long, default_value = "sub")]
    pub profile: ProfileArg,

    /// RTSP path for the main stream (generic RTSP cameras)
    #[arg(long)]
    pub main_path: Option<String>,

    /// RTSP path for the sub stream (generic RTSP cameras)
    #[arg(long)]
    pub sub_path: Option<String>,
}

// ── Channels & PTZ ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ChannelsArgs {
    /// Device ID
    pub device: String,

    /// Register every discovered channel as a camera
    #[arg(long)]
    pub import: bool,
}

#[derive(Debug, Args)]
#[command(group(
    clap::ArgGroup::new("action")
        .required(true)
        .args(["pan", "tilt", "zoom", "preset", "stop"])
        .multiple(true)
))]
pub struct PtzArgs {
    /// Camera ID
    pub camera: String,

    /// Pan speed, -100..=100
    #[arg(long, allow_hyphen_values = true, value_parser = clap::value_parser!(i8).range(-100..=100))]
    pub pan: Option<i8>,

    /// Tilt speed, -100..=100
    #[arg(long, allow_hyphen_values = true, value_parser = clap::value_parser!(i8).range(-100..=100))]
    pub tilt: Option<i8>,

    /// Zoom speed, -100..=100
    #[arg(long, allow_hyphen_values = true, value_parser = clap::value_parser!(i8).range(-100..=100))]
    pub zoom: Option<i8>,

    /// Go to a stored preset
    #[arg(long, conflicts_with_all = ["pan", "tilt", "zoom", "stop"])]
    pub preset: Option<u32>,

    /// Stop any movement
    #[arg(long, conflicts_with_all = ["pan", "tilt", "zoom"])]
    pub stop: bool,
}

// ── Config & Completions ─────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the resolved configuration (secrets redacted)
    Show,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
