//! Backoff for object store transfers.
//!
//! Only the fetch and upload phases go through this; target insertions are
//! attempted once and their failure is recorded in the sheet.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use serde::Deserialize;

/// Errors that can tell a passing network hiccup from a permanent failure.
pub trait Transient: std::fmt::Display {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Pause before the attempt following failed attempt `failed` (1-based):
    /// the base delay doubled per earlier failure, capped at the maximum,
    /// plus up to one base delay of jitter.
    pub fn backoff(&self, failed: u32) -> Duration {
        let base = Duration::from_secs(self.base_delay_secs);
        let doublings = failed.saturating_sub(1).min(31);
        let scaled = base.saturating_mul(1 << doublings);
        let capped = scaled.min(Duration::from_secs(self.max_delay_secs));
        if base.is_zero() {
            return capped;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..base.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the retry budget is
/// spent; the last error is returned in the latter cases. `what` names the
/// transfer in log lines.
pub async fn with_retries<T, E, F, Fut>(config: &RetryConfig, what: &str, attempt: F) -> Result<T, E>
where
    E: Transient,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failed = 0u32;
    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failed += 1;
        if !err.is_transient() || failed > config.max_retries {
            return Err(err);
        }
        let pause = config.backoff(failed);
        tracing::warn!(
            transfer = what,
            failed,
            budget = config.max_retries,
            "Transient error, retrying in {:.1}s: {}",
            pause.as_secs_f64(),
            err
        );
        tokio::time::sleep(pause).await;
    }
}
