//! Publication targets. Each target owns two reserved columns in the source
//! sheet, `<id>_status` and `<id>_record_id`, and turns a row into one
//! published record.

pub mod asset;
pub mod catalog;
pub mod error;
pub mod index;
pub mod messaging;
pub mod template;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::config::TargetConfig;
use crate::drive::ObjectStore;
use crate::layout::Layout;
use crate::telegram::MessagingGateway;
use crate::types::TargetKind;

pub use asset::AssetCache;
pub use catalog::{CatalogSettings, CatalogTarget};
pub use error::TargetError;
pub use messaging::MessagingTarget;
pub use template::Template;

/// Header name to cell text for one data row.
pub type Row = BTreeMap<String, String>;

pub fn target_id(kind: TargetKind, name: &str) -> String {
    format!("{}_{}", kind.as_str(), name)
}

pub fn status_column(target_id: &str) -> String {
    format!("{}_status", target_id)
}

pub fn record_id_column(target_id: &str) -> String {
    format!("{}_record_id", target_id)
}

pub(crate) fn required_field<'a>(row: &'a Row, field: &'static str) -> Result<&'a str, TargetError> {
    row.get(field)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(TargetError::MissingField(field))
}

/// What every target of one item shares.
#[derive(Clone)]
pub struct TargetContext<'a> {
    pub work_dir: &'a Path,
    pub cache: AssetCache,
    pub layout: Layout,
    pub gateway: Arc<dyn MessagingGateway>,
}

#[derive(Debug)]
pub enum Target {
    Messaging(MessagingTarget),
    Catalog(CatalogTarget),
}

impl Target {
    pub async fn from_config(config: &TargetConfig, ctx: &TargetContext<'_>) -> anyhow::Result<Self> {
        let id = target_id(config.kind, &config.name);
        let target = match config.kind {
            TargetKind::Telegram => {
                let channel = config
                    .telegram_channel
                    .clone()
                    .filter(|c| !c.is_empty())
                    .with_context(|| format!("Target {}: telegram_channel not set", id))?;
                let template = Template::load(&config.template)
                    .await
                    .with_context(|| format!("Target {}", id))?;
                Target::Messaging(MessagingTarget::new(
                    id,
                    channel,
                    template,
                    ctx.cache.clone(),
                    ctx.gateway.clone(),
                ))
            }
            TargetKind::HtmlCatalog => {
                let dir = config
                    .dir
                    .as_deref()
                    .with_context(|| format!("Target {}: dir not set", id))?;
                let catalog = config
                    .catalog
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .with_context(|| format!("Target {}: catalog not set", id))?;
                let settings = CatalogSettings {
                    id: id.clone(),
                    dir,
                    catalog,
                    template: &config.template,
                    index_placeholder: config.index_placeholder.as_deref().unwrap_or_default(),
                    work_dir: ctx.work_dir,
                    cache: ctx.cache.clone(),
                    layout: ctx.layout,
                };
                Target::Catalog(
                    CatalogTarget::open(settings)
                        .await
                        .with_context(|| format!("Target {}", id))?,
                )
            }
        };
        Ok(target)
    }

    pub fn id(&self) -> &str {
        match self {
            Target::Messaging(t) => t.id(),
            Target::Catalog(t) => t.id(),
        }
    }

    /// Publish a new record for `row`; returns its record id.
    pub async fn insert(&mut self, row: &Row, store: &dyn ObjectStore) -> Result<String, TargetError> {
        match self {
            Target::Messaging(t) => t.insert(row, store).await,
            Target::Catalog(t) => t.insert(row, store).await,
        }
    }

    /// Re-publish the record `record_id` from `row`.
    pub async fn update(
        &mut self,
        _row: &Row,
        _record_id: &str,
        _store: &dyn ObjectStore,
    ) -> Result<(), TargetError> {
        Err(TargetError::UpdateUnsupported)
    }

    /// Called once after the item's last row. Neither target buffers
    /// anything past an insertion yet.
    pub async fn finish(&mut self) -> Result<(), TargetError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeGateway, FakeStore};
    use std::path::PathBuf;

    fn config(kind: TargetKind, name: &str, template: PathBuf) -> TargetConfig {
        TargetConfig {
            kind,
            name: name.into(),
            dir: None,
            catalog: None,
            telegram_channel: None,
            template,
            index_placeholder: None,
        }
    }

    #[test]
    fn test_reserved_column_names() {
        let id = target_id(TargetKind::HtmlCatalog, "site");
        assert_eq!(id, "html_catalog_site");
        assert_eq!(status_column(&id), "html_catalog_site_status");
        assert_eq!(record_id_column(&id), "html_catalog_site_record_id");
        assert_eq!(target_id(TargetKind::Telegram, "news"), "telegram_news");
    }

    #[test]
    fn test_required_field() {
        let mut row = Row::new();
        row.insert("title".into(), String::new());
        assert!(matches!(
            required_field(&row, "title"),
            Err(TargetError::MissingField("title"))
        ));
        row.insert("title".into(), "T".into());
        assert_eq!(required_field(&row, "title").unwrap(), "T");
    }

    #[tokio::test]
    async fn test_from_config_builds_each_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("t.html");
        std::fs::write(&template, "{{ title }}").unwrap();
        let ctx = TargetContext {
            work_dir: tmp.path(),
            cache: AssetCache::new(tmp.path().join("audio"), Layout::default()),
            layout: Layout::default(),
            gateway: Arc::new(FakeGateway::default()),
        };

        let mut tg = config(TargetKind::Telegram, "news", template.clone());
        assert!(Target::from_config(&tg, &ctx).await.is_err());
        tg.telegram_channel = Some("@news".into());
        let t = Target::from_config(&tg, &ctx).await.unwrap();
        assert_eq!(t.id(), "telegram_news");

        let mut html = config(TargetKind::HtmlCatalog, "site", template);
        html.dir = Some(tmp.path().join("www"));
        html.catalog = Some("podcast".into());
        let err = Target::from_config(&html, &ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("index placeholder not set"));
        html.index_placeholder = Some("<!--X-->".into());
        let t = Target::from_config(&html, &ctx).await.unwrap();
        assert_eq!(t.id(), "html_catalog_site");
        assert!(tmp.path().join("www/podcast/index.html").exists());
    }

    #[tokio::test]
    async fn test_update_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut t = Target::Messaging(MessagingTarget::new(
            "telegram_x".into(),
            "@x".into(),
            Template::from_source("{{ title }}".into()).unwrap(),
            AssetCache::new(tmp.path().to_path_buf(), Layout::default()),
            Arc::new(FakeGateway::default()),
        ));
        let err = t
            .update(&Row::new(), "42", &FakeStore::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::UpdateUnsupported));
        t.finish().await.unwrap();
    }
}
