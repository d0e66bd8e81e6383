//! CLI command definitions and handlers.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use localshare_core::client::{Client, ClientHandle};
use localshare_core::config::Config;

pub mod completions;
pub mod config;
pub mod get;
pub mod list;
pub mod relay;
pub mod share;

/// Load configuration with graceful fallback to defaults.
///
/// A broken config file is reported and ignored.
pub fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration: {}", e);
        Config::default()
    })
}

/// Load the configuration, apply the `--relay` override and start a client.
pub fn start_client(relay: Option<String>) -> ClientHandle {
    let mut config = load_config();
    if let Some(url) = relay {
        config.client.relay_url = url;
    }
    Client::spawn(config)
}

/// LocalShare - share files with devices on your local network
#[derive(Parser)]
#[command(name = "localshare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Relay websocket URL (overrides the configured one)
    #[arg(long, global = true, env = "LOCALSHARE_RELAY")]
    pub relay: Option<String>,

    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the signaling relay
    Relay(RelayArgs),

    /// Share files and folders until interrupted
    Share(ShareArgs),

    /// List files shared on this network
    List(ListArgs),

    /// Download shared files
    Get(GetArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the relay command
#[derive(Parser)]
pub struct RelayArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Serve a browser UI bundle from this directory
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
}

/// Arguments for the share command
#[derive(Parser)]
pub struct ShareArgs {
    /// Files and folders to share
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the list command
#[derive(Parser)]
pub struct ListArgs {
    /// How long to wait for the relay (e.g., 5s)
    #[arg(short, long, default_value = "5s")]
    pub timeout: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the get command
#[derive(Parser)]
pub struct GetArgs {
    /// Names of the files to download
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Only download from this device id
    #[arg(long)]
    pub from: Option<String>,

    /// Output directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// How long to wait for the relay (e.g., 5s)
    #[arg(short, long, default_value = "5s")]
    pub timeout: String,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}

/// Arguments for the completions command
#[derive(Parser)]
pub struct CompletionsArgs {
    /// Completions subcommand
    #[command(subcommand)]
    pub action: CompletionsAction,
}

/// Completions subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum CompletionsAction {
    /// Install shell completions (auto-detects shell)
    Install {
        /// Override shell detection
        #[arg(long, value_enum)]
        shell: Option<ShellType>,
    },

    /// Generate completions and print to stdout (for manual installation)
    Generate {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: ShellType,
    },
}

/// Supported shell types for completions
#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ShellType {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
}
