//! Shell completions generation and installation.

use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{bail, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, Shell};

use super::{Cli, CompletionsAction, ShellType};

const BIN_NAME: &str = "localshare";

impl From<ShellType> for Shell {
    fn from(shell: ShellType) -> Self {
        match shell {
            ShellType::Bash => Self::Bash,
            ShellType::Zsh => Self::Zsh,
            ShellType::Fish => Self::Fish,
        }
    }
}

/// Run the completions command.
pub fn run(action: CompletionsAction) -> Result<()> {
    match action {
        CompletionsAction::Install { shell } => install(shell),
        CompletionsAction::Generate { shell } => {
            let mut cmd = Cli::command();
            generate(Shell::from(shell), &mut cmd, BIN_NAME, &mut io::stdout());
            Ok(())
        }
    }
}

fn generate_completions(shell: ShellType) -> Result<String> {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    generate(Shell::from(shell), &mut cmd, BIN_NAME, &mut buf);
    String::from_utf8(buf).context("Generated completions are not valid UTF-8")
}

fn detect_shell() -> Result<ShellType> {
    let shell_path = env::var("SHELL").context(
        "Could not detect shell from $SHELL environment variable.\n\
         Use --shell to specify your shell manually.",
    )?;
    shell_from_path(&shell_path)
}

fn shell_from_path(shell_path: &str) -> Result<ShellType> {
    let shell_name = shell_path
        .rsplit('/')
        .next()
        .unwrap_or(shell_path)
        .to_lowercase();

    match shell_name.as_str() {
        "bash" => Ok(ShellType::Bash),
        "zsh" => Ok(ShellType::Zsh),
        "fish" => Ok(ShellType::Fish),
        other => bail!(
            "Unknown shell: {other}\n\
             Supported shells: bash, zsh, fish\n\
             Use --shell to specify your shell manually."
        ),
    }
}

fn completions_path(shell: ShellType, home: &Path) -> PathBuf {
    let xdg_data =
        env::var("XDG_DATA_HOME").map_or_else(|_| home.join(".local/share"), PathBuf::from);
    match shell {
        ShellType::Bash => xdg_data.join("bash-completion/completions").join(BIN_NAME),
        ShellType::Zsh => xdg_data.join("zsh/site-functions").join(format!("_{BIN_NAME}")),
        ShellType::Fish => {
            let xdg_config =
                env::var("XDG_CONFIG_HOME").map_or_else(|_| home.join(".config"), PathBuf::from);
            xdg_config
                .join("fish/completions")
                .join(format!("{BIN_NAME}.fish"))
        }
    }
}

fn install(shell_override: Option<ShellType>) -> Result<()> {
    let shell = match shell_override {
        Some(s) => s,
        None => detect_shell()?,
    };

    let home = env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .context("Could not determine home directory")?;
    let path = completions_path(shell, &home);
    let completions = generate_completions(shell)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &completions)
        .with_context(|| format!("Failed to write completions to: {}", path.display()))?;

    println!("✓ Installed {shell:?} completions to: {}", path.display());
    if matches!(shell, ShellType::Zsh) {
        println!();
        println!("Make sure ~/.local/share/zsh/site-functions is in your fpath.");
    }
    Ok(())
}
