use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer};

use crate::layout::Layout;
use crate::retry::RetryConfig;
use crate::target::target_id;
use crate::types::TargetKind;

/// Application configuration, read from a JSON file.
#[derive(Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_path")]
    pub data_dir: PathBuf,
    #[serde(deserialize_with = "deserialize_path")]
    pub google_credentials_file: PathBuf,
    #[serde(deserialize_with = "deserialize_path")]
    pub google_token_file: PathBuf,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(alias = "items")]
    pub tasks: Vec<TaskConfig>,

    #[serde(default)]
    pub bot_users: Vec<i64>,
    #[serde(default)]
    pub bot_trigger_message: String,
    /// Seconds between poll cycles.
    #[serde(default = "default_refresh_interval")]
    pub bot_refresh_interval: u64,
    #[serde(default = "default_max_errors")]
    pub bot_max_errors: u32,
    /// Long-poll wait in seconds.
    #[serde(default = "default_poll_timeout")]
    pub bot_poll_timeout: u64,

    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(flatten)]
    pub layout: Layout,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    /// Remote spreadsheet name; also the stem of the local files.
    pub file: String,
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_opt_path")]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub telegram_channel: Option<String>,
    #[serde(deserialize_with = "deserialize_path")]
    pub template: PathBuf,
    #[serde(default)]
    pub index_placeholder: Option<String>,
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_max_errors() -> u32 {
    5
}

fn default_poll_timeout() -> u64 {
    30
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("google_credentials_file", &self.google_credentials_file)
            .field("google_token_file", &self.google_token_file)
            .field("telegram_bot_token", &"<redacted>")
            .field("tasks", &self.tasks)
            .field("bot_users", &self.bot_users)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn deserialize_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(expand_tilde(&raw))
}

fn deserialize_opt_path<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(|s| expand_tilde(&s)))
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.tasks.is_empty() {
            bail!("no tasks configured");
        }
        let mut names = HashSet::new();
        for task in &self.tasks {
            if task.name.is_empty() {
                bail!("task name must not be empty");
            }
            if task.name.contains(['/', '\\']) || task.name == "." || task.name == ".." {
                bail!("task name {:?} cannot be used as a directory name", task.name);
            }
            if !names.insert(task.name.as_str()) {
                bail!("duplicate task name {:?}", task.name);
            }
            if task.file.is_empty() {
                bail!("task {}: file not set", task.name);
            }
            if task.targets.is_empty() {
                bail!("task {}: no targets configured", task.name);
            }

            let mut ids = HashSet::new();
            for target in &task.targets {
                let id = target_id(target.kind, &target.name);
                if target.name.is_empty() {
                    bail!("task {}: {} target without a name", task.name, target.kind.as_str());
                }
                if !ids.insert(id.clone()) {
                    bail!("task {}: duplicate target id {}", task.name, id);
                }
                match target.kind {
                    TargetKind::Telegram => {
                        if is_blank(&target.telegram_channel) {
                            bail!("task {}: target {}: telegram_channel not set", task.name, id);
                        }
                        if self.telegram_bot_token.is_empty() {
                            bail!("task {}: target {} needs telegram_bot_token", task.name, id);
                        }
                    }
                    TargetKind::HtmlCatalog => {
                        if target.dir.is_none() {
                            bail!("task {}: target {}: dir not set", task.name, id);
                        }
                        if is_blank(&target.catalog) {
                            bail!("task {}: target {}: catalog not set", task.name, id);
                        }
                        if is_blank(&target.index_placeholder) {
                            bail!("task {}: target {}: index placeholder not set", task.name, id);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Extra requirements of bot mode.
    pub fn validate_bot(&self) -> anyhow::Result<()> {
        if self.telegram_bot_token.is_empty() {
            bail!("bot mode needs telegram_bot_token");
        }
        if self.bot_trigger_message.is_empty() {
            bail!("bot mode needs bot_trigger_message");
        }
        if self.bot_users.is_empty() {
            bail!("bot mode needs at least one entry in bot_users");
        }
        Ok(())
    }
}

/// `<executable path>.json`, next to the binary.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let mut path = std::env::args_os()
        .next()
        .context("Cannot determine executable name for the default config path")?;
    path.push(".json");
    Ok(PathBuf::from(path))
}
