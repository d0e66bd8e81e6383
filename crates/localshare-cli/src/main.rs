//! LocalShare CLI - share files with devices on your local network
//!
//! Devices that reach the relay from the same network see each other's shared
//! files and download them directly from one another.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the relay (once per network)
//! localshare relay
//!
//! # Share files
//! localshare share ./document.pdf ./photos
//!
//! # See what is shared and download (on another device)
//! localshare list
//! localshare get document.pdf
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Relay(args) => commands::relay::run(args).await,
        Command::Share(args) => commands::share::run(args, cli.relay).await,
        Command::List(args) => commands::list::run(args, cli.relay).await,
        Command::Get(args) => commands::get::run(args, cli.relay).await,
        Command::Config(args) => commands::config::run(&args),
        Command::Completions(args) => commands::completions::run(args.action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "info,localshare=debug,localshare_core=debug"
    } else {
        "warn,localshare=info,localshare_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
