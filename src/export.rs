//! Export orchestrator: fetch every item's spreadsheet, synchronize its rows,
//! upload changed spreadsheets back, and optionally remove the run directory.
//!
//! Stages run strictly in order and items are handled one after another.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::config::{Config, TaskConfig};
use crate::drive::{ObjectStore, StoreError, SPREADSHEET_MIME, XLSX_MIME};
use crate::layout::Layout;
use crate::retry::{with_retries, RetryConfig};
use crate::sync::sync_file;
use crate::target::asset::write_stream;
use crate::target::{AssetCache, Target, TargetContext};
use crate::telegram::MessagingGateway;

const RUN_DIR_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ASSET_DIR: &str = "audio";

/// Outcome of one item, as reported to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemResult {
    pub name: String,
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl ItemResult {
    fn fail(&mut self, error: String) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

struct Item {
    file: String,
    source: PathBuf,
    result_path: PathBuf,
    targets: Vec<Target>,
    /// Set by a successful fetch; items without it are out of the batch.
    remote_id: Option<String>,
    mutated: bool,
    result: ItemResult,
}

impl Item {
    async fn new(
        task: &TaskConfig,
        run_dir: &Path,
        gateway: &Arc<dyn MessagingGateway>,
        layout: Layout,
    ) -> anyhow::Result<Self> {
        let dir = run_dir.join(&task.name);
        layout
            .create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create working directory {}", dir.display()))?;

        let ctx = TargetContext {
            work_dir: &dir,
            cache: AssetCache::new(dir.join(ASSET_DIR), layout),
            layout,
            gateway: gateway.clone(),
        };
        let mut targets: Vec<Target> = Vec::with_capacity(task.targets.len());
        let mut ids = HashSet::new();
        for target_config in &task.targets {
            let target = Target::from_config(target_config, &ctx)
                .await
                .with_context(|| format!("Task {}", task.name))?;
            if !ids.insert(target.id().to_string()) {
                bail!("Task {}: duplicate target id {}", task.name, target.id());
            }
            targets.push(target);
        }

        Ok(Self {
            file: task.file.clone(),
            source: dir.join(format!("{}.xlsx", task.file)),
            result_path: dir.join(format!("{}_result.xlsx", task.file)),
            targets,
            remote_id: None,
            mutated: false,
            result: ItemResult {
                name: task.name.clone(),
                ..ItemResult::default()
            },
        })
    }
}

pub struct Export {
    run_dir: PathBuf,
    items: Vec<Item>,
    store: Arc<dyn ObjectStore>,
    retry: RetryConfig,
    layout: Layout,
}

impl Export {
    /// Prepare a run under `<data_dir>/<timestamp>` with every configured task.
    pub async fn new(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> anyhow::Result<Self> {
        let run_dir = config
            .data_dir
            .join(chrono::Local::now().format(RUN_DIR_FORMAT).to_string());
        Self::with_run_dir(run_dir, &config.tasks, store, gateway, config.retry, config.layout).await
    }

    pub async fn with_run_dir(
        run_dir: PathBuf,
        tasks: &[TaskConfig],
        store: Arc<dyn ObjectStore>,
        gateway: Arc<dyn MessagingGateway>,
        retry: RetryConfig,
        layout: Layout,
    ) -> anyhow::Result<Self> {
        layout
            .create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;

        let mut items = Vec::with_capacity(tasks.len());
        for task in tasks {
            items.push(Item::new(task, &run_dir, &gateway, layout).await?);
        }
        tracing::info!(run_dir = %run_dir.display(), items = items.len(), "Prepared export");
        Ok(Self {
            run_dir,
            items,
            store,
            retry,
            layout,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Download every item's spreadsheet as XLSX. An item whose fetch fails
    /// is left out of the remaining stages.
    pub async fn fetch(&mut self) {
        let store = self.store.as_ref();
        let layout = self.layout;
        for item in &mut self.items {
            let file = item.file.as_str();
            let source = item.source.as_path();
            let fetched = with_retries(&self.retry, "fetch", || async move {
                let id = store.find(file, Some(SPREADSHEET_MIME)).await?;
                let content = store.download(&id, Some(XLSX_MIME)).await?;
                let out = layout.create(source).await?;
                write_stream(content, out).await?;
                Ok::<_, StoreError>(id)
            })
            .await;

            match fetched {
                Ok(id) => {
                    tracing::info!(item = %item.result.name, file = %item.file, "Fetched spreadsheet");
                    item.remote_id = Some(id);
                }
                Err(e) => {
                    tracing::error!(item = %item.result.name, file = %item.file, "Fetch failed: {}", e);
                    item.result.fail(format!("fetch failed: {}", e));
                }
            }
        }
    }

    /// Synchronize every fetched item, then let its targets finish.
    pub async fn process(&mut self) {
        let store = self.store.as_ref();
        let layout = self.layout;
        for item in self.items.iter_mut().filter(|i| i.remote_id.is_some()) {
            match sync_file(&item.source, &item.result_path, &mut item.targets, store, layout).await {
                Ok(outcome) => {
                    item.mutated = outcome.mutated;
                    item.result.total = outcome.stats.total;
                    item.result.done = outcome.stats.done;
                    item.result.failed = outcome.stats.failed;
                }
                Err(e) => {
                    tracing::error!(item = %item.result.name, "Sync failed: {}", e);
                    item.result.fail(e.to_string());
                }
            }
            for target in &mut item.targets {
                if let Err(e) = target.finish().await {
                    tracing::warn!(item = %item.result.name, target_id = %target.id(), "Finish failed: {}", e);
                    item.result.fail(format!("{}: {}", target.id(), e));
                }
            }
        }
    }

    /// Replace the remote spreadsheet of every item whose sheet changed.
    pub async fn upload(&mut self) {
        let store = self.store.as_ref();
        for item in &mut self.items {
            let Some(id) = item.remote_id.as_deref() else {
                continue;
            };
            if !item.mutated {
                tracing::debug!(item = %item.result.name, "No changes to upload");
                continue;
            }
            let content = match tokio::fs::read(&item.result_path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::error!(item = %item.result.name, "Cannot read result file: {}", e);
                    item.result.fail(format!("upload failed: {}", e));
                    continue;
                }
            };
            let file = item.file.as_str();
            let content = &content;
            let uploaded = with_retries(&self.retry, "upload", || async move {
                store
                    .replace(id, file, SPREADSHEET_MIME, XLSX_MIME, content.clone())
                    .await
            })
            .await;
            match uploaded {
                Ok(()) => tracing::info!(item = %item.result.name, file = %item.file, "Uploaded spreadsheet"),
                Err(e) => {
                    tracing::error!(item = %item.result.name, file = %item.file, "Upload failed: {}", e);
                    item.result.fail(format!("upload failed: {}", e));
                }
            }
        }
    }

    /// Remove the run directory with everything staged in it.
    pub async fn clean(&self) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(&self.run_dir).await?;
        tracing::debug!(run_dir = %self.run_dir.display(), "Removed run directory");
        Ok(())
    }

    /// Per-item results in configuration order.
    pub fn results(&self) -> Vec<ItemResult> {
        self.items.iter().map(|i| i.result.clone()).collect()
    }
}

/// Run all stages once: fetch, process, upload, then clean unless `keep`.
pub async fn run_once(mut export: Export, keep: bool) -> Vec<ItemResult> {
    export.fetch().await;
    export.process().await;
    export.upload().await;
    let results = export.results();
    if !keep {
        if let Err(e) = export.clean().await {
            tracing::warn!(run_dir = %export.run_dir().display(), "Failed to clean up: {}", e);
        }
    }
    results
}
