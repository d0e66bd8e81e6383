//! Config command implementation.

use anyhow::{Context, Result};

use localshare_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: &ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load().context("Failed to load configuration")?;
            let content =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{}", content);
        }
        ConfigAction::Path => println!("{}", Config::config_path().display()),
        ConfigAction::Reset => {
            Config::default()
                .save()
                .context("Failed to write configuration")?;
            println!("✓ Configuration reset to defaults");
            println!("  {}", Config::config_path().display());
        }
    }
    Ok(())
}
