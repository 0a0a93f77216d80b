//! Chat-triggered sync loop.
//!
//! Each cycle long-polls the messaging gateway, keeps the trigger messages
//! from allowed senders that arrived after startup, runs one sync for all of
//! them and sends the report back to every chat that asked.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::export::ItemResult;
use crate::systemd::SystemdNotifier;
use crate::telegram::{GatewayError, MessagingGateway, Update};

const STARTING_NOTICE: &str = "starting sync...";

#[derive(Debug, Clone)]
pub struct BotSettings {
    pub allowed_users: HashSet<i64>,
    pub trigger: String,
    pub interval: Duration,
    pub max_errors: u32,
    pub poll_timeout: Duration,
}

impl BotSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_users: config.bot_users.iter().copied().collect(),
            trigger: config.bot_trigger_message.clone(),
            interval: Duration::from_secs(config.bot_refresh_interval),
            max_errors: config.bot_max_errors,
            poll_timeout: Duration::from_secs(config.bot_poll_timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    NoChat,
    Stale,
    UnknownSender,
    NotTrigger,
}

pub struct BotPoller {
    gateway: Arc<dyn MessagingGateway>,
    settings: BotSettings,
    /// Unix seconds; earlier messages are history and never trigger.
    started_at: i64,
    offset: i64,
}

impl BotPoller {
    pub fn new(gateway: Arc<dyn MessagingGateway>, settings: BotSettings, started_at: i64) -> Self {
        Self {
            gateway,
            settings,
            started_at,
            offset: 0,
        }
    }

    #[cfg(test)]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    fn authorize(&self, update: &Update) -> Result<i64, Rejection> {
        let chat = update.chat_id.ok_or(Rejection::NoChat)?;
        if update.timestamp < self.started_at {
            return Err(Rejection::Stale);
        }
        match update.sender_id {
            Some(sender) if self.settings.allowed_users.contains(&sender) => {}
            _ => return Err(Rejection::UnknownSender),
        }
        if update.text != self.settings.trigger {
            return Err(Rejection::NotTrigger);
        }
        Ok(chat)
    }

    /// Fetch new updates and return the distinct chats that asked for a sync.
    /// The offset moves past every update seen, authorized or not.
    pub async fn poll(&mut self) -> Result<BTreeSet<i64>, GatewayError> {
        let updates = self
            .gateway
            .poll_updates(self.offset, self.settings.poll_timeout)
            .await?;
        tracing::debug!(count = updates.len(), "Received updates");

        let mut chats = BTreeSet::new();
        for update in &updates {
            self.offset = self.offset.max(update.update_id);
            match self.authorize(update) {
                Ok(chat) => {
                    chats.insert(chat);
                }
                Err(reason) => {
                    tracing::debug!(update_id = update.update_id, ?reason, "Ignoring update");
                }
            }
        }
        Ok(chats)
    }

    async fn send_all(&self, chats: &BTreeSet<i64>, text: &str) {
        for chat in chats {
            if let Err(e) = self.gateway.send_text(&chat.to_string(), text).await {
                tracing::warn!(chat, "Failed to send message: {}", e);
            }
        }
    }

    /// Poll until shutdown or until polling fails `max_errors` times in a row.
    /// `sync` runs to completion once started.
    pub async fn run<F, Fut>(
        &mut self,
        mut sync: F,
        shutdown: CancellationToken,
        notifier: SystemdNotifier,
    ) -> anyhow::Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<ItemResult>>>,
    {
        let mut errors = 0u32;
        tracing::info!("Listening for sync requests");
        notifier.notify_status("listening");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let polled = tokio::select! {
                r = self.poll() => r,
                () = shutdown.cancelled() => break,
            };

            match polled {
                Err(e) => {
                    errors += 1;
                    tracing::warn!(errors, max = self.settings.max_errors, "Polling failed: {}", e);
                    if errors >= self.settings.max_errors {
                        return Err(e).context("Too many consecutive polling errors");
                    }
                }
                Ok(chats) => {
                    errors = 0;
                    if !chats.is_empty() {
                        tracing::info!(requests = chats.len(), "Starting sync");
                        self.send_all(&chats, STARTING_NOTICE).await;
                        notifier.notify_status("syncing");
                        let report = format_report(&sync().await);
                        tracing::info!("Sync report:\n{}", report);
                        self.send_all(&chats, &report).await;
                        notifier.notify_status("listening");
                    }
                }
            }
            notifier.notify_watchdog();

            tokio::select! {
                () = tokio::time::sleep(self.settings.interval) => {}
                () = shutdown.cancelled() => break,
            }
        }
        tracing::info!("Bot stopped");
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    minijinja::HtmlEscape(text).to_string()
}

/// Chat-facing summary of one sync run; safe to send as HTML.
pub fn format_report(results: &anyhow::Result<Vec<ItemResult>>) -> String {
    let items = match results {
        Err(e) => return escape_html(&format!("sync failed: {:#}", e)),
        Ok(items) => items,
    };
    if items.is_empty() {
        return "nothing to sync".to_string();
    }
    let mut report = String::new();
    for item in items {
        report.push_str(&escape_html(&item.name));
        report.push('\n');
        if let Some(error) = &item.error {
            report.push_str(&format!("error: {}\n", escape_html(error)));
        }
        report.push_str(&format!(
            "records: total {}, done {}, failed {}\n",
            item.total, item.done, item.failed
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{text_update, FakeGateway, Sent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START: i64 = 1_700_000_000;

    fn settings() -> BotSettings {
        BotSettings {
            allowed_users: [7].into_iter().collect(),
            trigger: "/sync".into(),
            interval: Duration::ZERO,
            max_errors: 3,
            poll_timeout: Duration::ZERO,
        }
    }

    fn poller(gateway: Arc<FakeGateway>) -> BotPoller {
        BotPoller::new(gateway, settings(), START)
    }

    fn poll_error() -> GatewayError {
        GatewayError::Api {
            code: 502,
            description: "Bad Gateway".into(),
        }
    }

    fn result(name: &str, total: usize, done: usize, failed: usize) -> ItemResult {
        ItemResult {
            name: name.into(),
            total,
            done,
            failed,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_only_authorized_fresh_triggers_count() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.push_poll(Ok(vec![
            text_update(10, 7, 100, "/sync", START - 1),
            text_update(11, 8, 100, "/sync", START + 1),
            text_update(12, 7, 100, "/sync please", START + 1),
            text_update(13, 7, 200, "/sync", START),
            text_update(14, 7, 200, "/sync", START + 5),
            text_update(15, 7, 300, "/sync", START + 5),
        ]));
        let mut p = poller(gateway.clone());

        let chats = p.poll().await.unwrap();
        assert_eq!(chats.into_iter().collect::<Vec<_>>(), vec![200, 300]);
        assert_eq!(p.offset(), 15);
    }

    #[tokio::test]
    async fn test_offset_advances_past_rejected_updates() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.push_poll(Ok(vec![text_update(41, 99, 1, "hello", START + 1)]));
        let mut p = poller(gateway.clone());

        assert!(p.poll().await.unwrap().is_empty());
        p.poll().await.unwrap();
        assert_eq!(*gateway.offsets.lock().unwrap(), vec![0, 41]);
    }

    #[tokio::test]
    async fn test_stale_update_never_triggers_sync() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.push_poll(Ok(vec![text_update(1, 7, 100, "/sync", START - 60)]));
        gateway.push_poll(Err(poll_error()));
        gateway.push_poll(Err(poll_error()));
        gateway.push_poll(Err(poll_error()));
        let runs = AtomicUsize::new(0);
        let mut p = poller(gateway.clone());

        let outcome = p
            .run(
                || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async { Ok(vec![]) }
                },
                CancellationToken::new(),
                SystemdNotifier::new(false),
            )
            .await;
        assert!(outcome.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_runs_one_sync_and_reports_to_each_chat() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.push_poll(Ok(vec![
            text_update(1, 7, 100, "/sync", START + 1),
            text_update(2, 7, 100, "/sync", START + 2),
            text_update(3, 7, 200, "/sync", START + 2),
        ]));
        for _ in 0..3 {
            gateway.push_poll(Err(poll_error()));
        }
        let runs = AtomicUsize::new(0);
        let mut p = poller(gateway.clone());

        let _ = p
            .run(
                || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async { Ok(vec![result("podcast", 2, 1, 1)]) }
                },
                CancellationToken::new(),
                SystemdNotifier::new(false),
            )
            .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let report = "podcast\nrecords: total 2, done 1, failed 1\n";
        let text = |chat: &str, t: &str| Sent::Text {
            chat: chat.into(),
            text: t.into(),
        };
        assert_eq!(
            gateway.sent(),
            vec![
                text("100", STARTING_NOTICE),
                text("200", STARTING_NOTICE),
                text("100", report),
                text("200", report),
            ]
        );
    }

    #[tokio::test]
    async fn test_success_resets_error_count() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.push_poll(Err(poll_error()));
        gateway.push_poll(Err(poll_error()));
        gateway.push_poll(Ok(vec![]));
        gateway.push_poll(Err(poll_error()));
        gateway.push_poll(Err(poll_error()));
        gateway.push_poll(Err(poll_error()));
        let mut p = poller(gateway.clone());

        let err = p
            .run(
                || async { Ok(vec![]) },
                CancellationToken::new(),
                SystemdNotifier::new(false),
            )
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("telegram request error 502"));
        assert_eq!(gateway.offsets.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_loop() {
        let gateway = Arc::new(FakeGateway::default());
        let token = CancellationToken::new();
        token.cancel();
        let mut p = poller(gateway);
        p.run(
            || async { Ok(vec![]) },
            token,
            SystemdNotifier::new(false),
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_format_report() {
        let mut failed = result("b<x>", 0, 0, 0);
        failed.error = Some("fetch failed: file not found: B".into());
        let report = format_report(&Ok(vec![result("a", 3, 2, 1), failed]));
        assert_eq!(
            report,
            "a\nrecords: total 3, done 2, failed 1\n\
             b&lt;x&gt;\nerror: fetch failed: file not found: B\nrecords: total 0, done 0, failed 0\n"
        );
    }

    #[test]
    fn test_format_report_escapes_like_templates() {
        let mut item = result("a&b", 1, 0, 1);
        item.error = Some("<b>\"x\"</b>".into());
        let report = format_report(&Ok(vec![item]));
        assert!(report.starts_with("a&amp;b\n"));
        assert!(report.contains("error: &lt;b&gt;&quot;x&quot;&lt;"));
        assert!(!report.contains('<'));
    }

    #[test]
    fn test_format_report_for_failed_run() {
        let report = format_report(&Err(anyhow::anyhow!("token expired")));
        assert_eq!(report, "sync failed: token expired");
    }
}
