//! UI utilities for LocalShare CLI.

use std::io::{self, Write};
use std::time::Duration;

use localshare_core::file::format_size;
use localshare_core::protocol::AdvertisedFile;
use localshare_core::transfer::{TransferDirection, TransferProgress};

const BAR_WIDTH: usize = 24;

/// Parse a timeout argument, falling back to `default` when unparseable.
pub fn parse_timeout(s: &str, default: Duration) -> Duration {
    localshare_core::config::parse_duration(s).unwrap_or(default)
}

/// Render a progress bar like `[#####-----]  42%`.
pub fn progress_bar(percentage: f64) -> String {
    let pct = percentage.clamp(0.0, 100.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((pct / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        pct
    )
}

/// Overwrite the current line with a transfer's progress.
pub fn print_progress(progress: &TransferProgress) {
    let arrow = match progress.direction {
        TransferDirection::Send => "↑",
        TransferDirection::Receive => "↓",
    };
    print!(
        "\r  {} {} {} {}/{}   ",
        arrow,
        progress.file_name,
        progress_bar(progress.percentage()),
        format_size(progress.transferred_bytes),
        format_size(progress.total_size)
    );
    let _ = io::stdout().flush();
}

/// Print the files shared in the group, grouped by owner.
pub fn print_files(files: &[AdvertisedFile], own_id: Option<&str>) {
    if files.is_empty() {
        println!("  Nothing is shared yet.");
        return;
    }

    let mut sorted: Vec<&AdvertisedFile> = files.iter().collect();
    sorted.sort_by(|a, b| (a.owner_id.as_str(), &a.name).cmp(&(b.owner_id.as_str(), &b.name)));

    let name_width = sorted
        .iter()
        .map(|f| f.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    println!("  {:<name_width$}  {:>10}  FROM", "NAME", "SIZE");
    for file in sorted {
        let owner = if Some(file.owner_id.as_str()) == own_id {
            format!("{} (you)", file.owner_id)
        } else {
            file.owner_id.to_string()
        };
        println!(
            "  {:<name_width$}  {:>10}  {}",
            file.name,
            format_size(file.size),
            owner
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), format!("[{}]   0%", "-".repeat(BAR_WIDTH)));
        assert_eq!(progress_bar(100.0), format!("[{}] 100%", "#".repeat(BAR_WIDTH)));
        assert!(progress_bar(50.0).starts_with(&format!("[{}-", "#".repeat(BAR_WIDTH / 2))));
        assert_eq!(progress_bar(250.0), progress_bar(100.0));
    }

    #[test]
    fn test_parse_timeout() {
        let fallback = Duration::from_secs(5);
        assert_eq!(parse_timeout("2s", fallback), Duration::from_secs(2));
        assert_eq!(parse_timeout("soon", fallback), fallback);
    }
}
