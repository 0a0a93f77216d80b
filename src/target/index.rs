use std::io;
use std::path::PathBuf;

use anyhow::bail;
use tokio::fs;

use crate::layout::Layout;

/// The catalog's listing page, kept in memory between insertions.
///
/// New entries are spliced in front of the placeholder, so the newest entry
/// sits last. The on-disk file is only ever replaced by renaming a fully
/// written temporary file over it, and the in-memory buffer changes only once
/// that rename has succeeded.
#[derive(Debug)]
pub struct CatalogIndex {
    path: PathBuf,
    temp_path: PathBuf,
    placeholder: String,
    buffer: String,
    layout: Layout,
}

impl CatalogIndex {
    /// Load the index at `path`, creating `<ul>{placeholder}</ul>` if absent.
    pub async fn open(
        path: PathBuf,
        temp_path: PathBuf,
        placeholder: &str,
        layout: Layout,
    ) -> anyhow::Result<Self> {
        if placeholder.is_empty() {
            bail!("catalog index placeholder must not be empty");
        }

        let buffer = match fs::read_to_string(&path).await {
            Ok(existing) => existing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let initial = format!("<ul>{}</ul>", placeholder);
                layout.write_file(&path, initial.as_bytes()).await?;
                tracing::info!(path = %path.display(), "Created catalog index");
                initial
            }
            Err(e) => return Err(e.into()),
        };

        match buffer.matches(placeholder).count() {
            1 => {}
            0 => bail!(
                "catalog index {} does not contain placeholder {:?}",
                path.display(),
                placeholder
            ),
            n => bail!(
                "catalog index {} contains placeholder {:?} {} times",
                path.display(),
                placeholder,
                n
            ),
        }

        Ok(Self {
            path,
            temp_path,
            placeholder: placeholder.to_string(),
            buffer,
            layout,
        })
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    fn spliced(&self, entry: &str) -> String {
        let mut with_placeholder = String::with_capacity(entry.len() + self.placeholder.len());
        with_placeholder.push_str(entry);
        with_placeholder.push_str(&self.placeholder);
        self.buffer.replacen(&self.placeholder, &with_placeholder, 1)
    }

    /// Publish `entry`: write the new index to the temp path, rename it over
    /// the live index, then commit the buffer. Any failure leaves both the
    /// file and the buffer at their previous content.
    pub async fn publish(&mut self, entry: &str) -> io::Result<()> {
        let next = self.spliced(entry);
        self.layout
            .write_file(&self.temp_path, next.as_bytes())
            .await?;
        if let Err(e) = fs::rename(&self.temp_path, &self.path).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(e);
        }
        self.buffer = next;
        Ok(())
    }
}
