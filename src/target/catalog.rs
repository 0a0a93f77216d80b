use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use fs4::fs_std::FileExt;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::asset::{write_stream, AssetCache};
use super::error::TargetError;
use super::index::CatalogIndex;
use super::template::Template;
use super::{required_field, Row};
use crate::drive::ObjectStore;
use crate::layout::Layout;

const ITEM_PAGE: &str = "index.html";
const ENTRY_TEMPLATE: &str = "<li><a href='//{{ catalog }}/{{ id }}?item={{ id }}'>{{ title }}</a></li>";
const PARAGRAPHS_TEMPLATE: &str = "{% for line in lines %}<p>{{ line }}</p>{% endfor %}";

pub struct CatalogSettings<'a> {
    pub id: String,
    pub dir: &'a Path,
    pub catalog: &'a str,
    pub template: &'a Path,
    pub index_placeholder: &'a str,
    /// Item working directory; holds the temporary index file.
    pub work_dir: &'a Path,
    pub cache: AssetCache,
    pub layout: Layout,
}

/// Static HTML catalog: one numbered directory per row plus an index page
/// linking to every published item.
#[derive(Debug)]
pub struct CatalogTarget {
    id: String,
    catalog: String,
    root: PathBuf,
    index: CatalogIndex,
    last_id: u64,
    template: Template,
    cache: AssetCache,
    layout: Layout,
    /// Held for the target's lifetime; released on drop.
    _lock: std::fs::File,
}

#[derive(Serialize)]
struct EntryContext<'a> {
    catalog: &'a str,
    id: u64,
    title: &'a str,
}

/// Wrap each non-empty line of `text` in `<p>`, escaping its content.
pub fn paragraphs(text: &str) -> Result<String, minijinja::Error> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .collect();
    Template::render_snippet(PARAGRAPHS_TEMPLATE, minijinja::context! { lines => lines })
}

/// Highest numeric entry name directly under `root`, 0 if there is none.
async fn scan_last_id(root: &Path) -> io::Result<u64> {
    let mut last = 0;
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
            last = last.max(id);
        }
    }
    Ok(last)
}

/// One writer per catalog directory, across processes. The lock file sits
/// beside the catalog root, outside the tree the web server publishes.
async fn acquire_lock(dir: &Path, catalog: &str) -> anyhow::Result<std::fs::File> {
    let path = dir.join(format!(".{}.lock", catalog));
    let lock = tokio::task::spawn_blocking(move || -> anyhow::Result<std::fs::File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open catalog lock {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Catalog is in use by another process (lock: {})",
                path.display()
            )
        })?;
        Ok(file)
    })
    .await??;
    Ok(lock)
}

impl CatalogTarget {
    pub async fn open(settings: CatalogSettings<'_>) -> anyhow::Result<Self> {
        if settings.index_placeholder.is_empty() {
            bail!("invalid config: index placeholder not set");
        }
        let root = settings.dir.join(settings.catalog);
        settings
            .layout
            .create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create catalog directory {}", root.display()))?;
        let lock = acquire_lock(settings.dir, settings.catalog).await?;

        let index = CatalogIndex::open(
            root.join(ITEM_PAGE),
            settings.work_dir.join(format!("{}_index.html", settings.id)),
            settings.index_placeholder,
            settings.layout,
        )
        .await?;
        let template = Template::load(settings.template).await?;
        let last_id = scan_last_id(&root)
            .await
            .with_context(|| format!("Failed to read catalog directory {}", root.display()))?;

        tracing::debug!(target_id = %settings.id, root = %root.display(), last_id, "Opened catalog");
        Ok(Self {
            id: settings.id,
            catalog: settings.catalog.to_string(),
            root,
            index,
            last_id,
            template,
            cache: settings.cache,
            layout: settings.layout,
            _lock: lock,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(test)]
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    #[cfg(test)]
    pub fn index(&self) -> &CatalogIndex {
        &self.index
    }

    pub async fn insert(&mut self, row: &Row, store: &dyn ObjectStore) -> Result<String, TargetError> {
        let title = required_field(row, "title")?;
        let text = required_field(row, "text")?;
        let body = paragraphs(text)?;

        let id = self.last_id + 1;
        let item_dir = self.root.join(id.to_string());
        self.layout.create_dir(&item_dir).await?;

        match self.publish(id, &item_dir, row, title, body, store).await {
            Ok(()) => {
                self.last_id = id;
                tracing::debug!(target_id = %self.id, item = id, "Published catalog item");
                Ok(id.to_string())
            }
            Err(e) => {
                if let Err(rm) = fs::remove_dir_all(&item_dir).await {
                    tracing::warn!(
                        dir = %item_dir.display(),
                        error = %rm,
                        "Failed to remove incomplete catalog item"
                    );
                }
                Err(e)
            }
        }
    }

    async fn publish(
        &mut self,
        id: u64,
        item_dir: &Path,
        row: &Row,
        title: &str,
        body: String,
        store: &dyn ObjectStore,
    ) -> Result<(), TargetError> {
        let mut fields = row.clone();
        if let Some(audio) = row.get("audio").filter(|a| !a.is_empty()) {
            let asset = self.cache.open(audio, store).await?;
            let file = self.layout.create_new(&item_dir.join(&asset.name)).await?;
            write_stream(asset.stream, file).await?;
            fields.insert(
                "audio".to_string(),
                format!("//{}/{}/{}", self.catalog, id, asset.name),
            );
        }

        let page = self.template.render(&fields, &[("text", body)])?;
        let mut file = self.layout.create_new(&item_dir.join(ITEM_PAGE)).await?;
        file.write_all(page.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;

        let entry = Template::render_snippet(
            ENTRY_TEMPLATE,
            EntryContext {
                catalog: &self.catalog,
                id,
                title,
            },
        )?;
        if entry.contains(self.index.placeholder()) {
            return Err(TargetError::PlaceholderCollision(title.to_string()));
        }
        self.index.publish(&entry).await?;
        Ok(())
    }
}
