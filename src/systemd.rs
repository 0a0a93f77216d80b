//! Service integration for bot mode: sd_notify messages and the PID file.
//!
//! Notifications are no-ops when disabled or off Linux.

use std::path::{Path, PathBuf};

use anyhow::Context;

#[derive(Debug, Clone, Copy)]
enum Message<'a> {
    Ready,
    Stopping,
    Status(&'a str),
    Watchdog,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) fn notify_ready(&self) {
        self.send(Message::Ready);
    }

    pub(crate) fn notify_stopping(&self) {
        self.send(Message::Stopping);
    }

    /// Human-readable status line shown by `systemctl status`.
    pub(crate) fn notify_status(&self, msg: &str) {
        self.send(Message::Status(msg));
    }

    /// Keepalive ping, sent once per poll cycle.
    pub(crate) fn notify_watchdog(&self) {
        self.send(Message::Watchdog);
    }

    fn send(&self, msg: Message<'_>) {
        if !self.enabled {
            return;
        }
        #[cfg(target_os = "linux")]
        {
            use sd_notify::NotifyState;

            let state = match msg {
                Message::Ready => NotifyState::Ready,
                Message::Stopping => NotifyState::Stopping,
                Message::Status(text) => NotifyState::Status(text),
                Message::Watchdog => NotifyState::Watchdog,
            };
            if let Err(e) = sd_notify::notify(false, &[state]) {
                tracing::debug!(error = %e, message = ?msg, "sd_notify failed");
            }
        }
        #[cfg(not(target_os = "linux"))]
        let _ = msg;
    }
}

/// Writes the process id on creation and removes the file on drop.
#[derive(Debug)]
pub(crate) struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub(crate) fn create(path: &Path) -> anyhow::Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write PID file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_notifier_is_noop() {
        let n = SystemdNotifier::new(false);
        n.notify_ready();
        n.notify_status("test");
        n.notify_watchdog();
        n.notify_stopping();
    }

    #[test]
    fn enabled_notifier_without_socket_does_not_panic() {
        let n = SystemdNotifier::new(true);
        n.notify_ready();
        n.notify_status("test");
        n.notify_watchdog();
        n.notify_stopping();
    }

    #[test]
    fn pid_file_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.pid");
        {
            let _pid = PidFile::create(&path).unwrap();
            let content = std::fs::read_to_string(&path).unwrap();
            assert_eq!(content.trim(), std::process::id().to_string());
        }
        assert!(!path.exists());
    }
}
