//! sheetsync: publish spreadsheet rows to Telegram channels and static HTML
//! catalogs, recording per-row, per-target status back in the spreadsheet.
//!
//! Runs once by default; with `--bot-mode` it waits for a trigger message and
//! runs a sync for every request.

#![warn(clippy::all)]

mod bot;
mod cli;
mod config;
mod drive;
mod export;
mod layout;
mod retry;
mod shutdown;
mod sync;
mod systemd;
mod table;
mod target;
mod telegram;
#[cfg(test)]
mod testutil;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bot::{BotPoller, BotSettings};
use config::Config;
use drive::{DriveClient, ObjectStore};
use export::{Export, ItemResult};
use systemd::{PidFile, SystemdNotifier};
use telegram::{MessagingGateway, TelegramClient};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One full export. Drive credentials are refreshed for every run so a
/// long-lived bot never works with an expired access token.
async fn run_export(
    config: &Config,
    http: &reqwest::Client,
    gateway: Arc<dyn MessagingGateway>,
    keep: bool,
) -> anyhow::Result<Vec<ItemResult>> {
    let token = drive::auth::load_access_token(
        http,
        &config.google_credentials_file,
        &config.google_token_file,
        &config.layout,
    )
    .await
    .context("Drive authorization failed")?;
    let store: Arc<dyn ObjectStore> = Arc::new(DriveClient::new(http.clone(), token));

    let export = Export::new(config, store, gateway).await?;
    Ok(export::run_once(export, keep).await)
}

fn log_results(results: &[ItemResult]) {
    for r in results {
        match &r.error {
            Some(error) => tracing::warn!(
                item = %r.name,
                total = r.total,
                done = r.done,
                failed = r.failed,
                "Item finished with error: {}",
                error
            ),
            None => tracing::info!(
                item = %r.name,
                total = r.total,
                done = r.done,
                failed = r.failed,
                "Item finished"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config_path = cli.config_path()?;
    let config = Config::load(&config_path)?;
    tracing::debug!(config = ?config, "Loaded config");

    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let gateway: Arc<dyn MessagingGateway> = Arc::new(TelegramClient::new(
        http.clone(),
        config.telegram_bot_token.clone(),
    ));

    if !cli.bot_mode {
        let results = run_export(&config, &http, gateway, cli.no_clean).await?;
        log_results(&results);
        return Ok(());
    }

    config.validate_bot()?;
    let _pid_file = cli.pid_file.as_deref().map(PidFile::create).transpose()?;
    let notifier = SystemdNotifier::new(cli.notify_systemd);
    let shutdown =
        shutdown::install_signal_handler().context("Failed to install signal handlers")?;

    let keep = cli.no_clean;
    let started_at = chrono::Utc::now().timestamp();
    let mut poller = BotPoller::new(gateway.clone(), BotSettings::from_config(&config), started_at);
    notifier.notify_ready();

    let outcome = poller
        .run(
            || {
                let gateway = gateway.clone();
                let (config, http) = (&config, &http);
                async move {
                    let results = run_export(config, http, gateway, keep).await;
                    if let Ok(results) = &results {
                        log_results(results);
                    }
                    results
                }
            },
            shutdown,
            notifier,
        )
        .await;

    notifier.notify_stopping();
    outcome
}
