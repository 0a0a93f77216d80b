use std::path::PathBuf;

use clap::Parser;

use crate::config::{default_config_path, expand_tilde};
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "sheetsync",
    about = "Publish spreadsheet rows to Telegram channels and static HTML catalogs"
)]
pub struct Cli {
    /// Path to the JSON config file (default: <executable>.json)
    #[arg(short = 'c', long, env = "SHEETSYNC_CONFIG")]
    pub config: Option<String>,

    /// Keep the run directory with fetched and modified files
    #[arg(long)]
    pub no_clean: bool,

    /// Wait for trigger messages from the bot instead of syncing once
    #[arg(long)]
    pub bot_mode: bool,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Send sd_notify messages to systemd in bot mode
    #[arg(long)]
    pub notify_systemd: bool,

    /// Write the process id to this file in bot mode
    #[arg(long)]
    pub pid_file: Option<PathBuf>,
}

impl Cli {
    pub fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(expand_tilde(path)),
            None => default_config_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["sheetsync"]).unwrap();
        assert!(!cli.no_clean);
        assert!(!cli.bot_mode);
        assert_eq!(cli.log_level, LogLevel::Info);
        assert!(cli.pid_file.is_none());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "sheetsync",
            "--config",
            "/etc/sheetsync.json",
            "--no-clean",
            "--bot-mode",
            "--log-level",
            "debug",
            "--notify-systemd",
            "--pid-file",
            "/run/sheetsync.pid",
        ])
        .unwrap();
        assert!(cli.no_clean && cli.bot_mode && cli.notify_systemd);
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.config_path().unwrap(), PathBuf::from("/etc/sheetsync.json"));
        assert_eq!(cli.pid_file, Some(PathBuf::from("/run/sheetsync.pid")));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["sheetsync", "--log-level", "loud"]).is_err());
    }
}
