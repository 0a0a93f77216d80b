//! Per-target message/page templates.
//!
//! Templates use minijinja syntax (`{{ title }}`) with HTML auto-escaping, so
//! row values are escaped unless a target explicitly marks one as safe.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use minijinja::{AutoEscape, Environment, Value};

use super::Row;

pub struct Template {
    env: Environment<'static>,
    source: String,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("source_len", &self.source.len())
            .finish_non_exhaustive()
    }
}

fn html_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env
}

impl Template {
    /// Parse `source`, failing on syntax errors.
    pub fn from_source(source: String) -> Result<Self, minijinja::Error> {
        Environment::new().template_from_str(&source).map(|_| ())?;
        Ok(Self {
            env: html_environment(),
            source,
        })
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template {}", path.display()))?;
        Self::from_source(source)
            .with_context(|| format!("Failed to parse template {}", path.display()))
    }

    /// Render with every row field as a variable; `safe` entries override
    /// row fields and are inserted without escaping.
    pub fn render(&self, row: &Row, safe: &[(&str, String)]) -> Result<String, minijinja::Error> {
        let mut ctx: BTreeMap<String, Value> = row
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        for (key, html) in safe {
            ctx.insert((*key).to_string(), Value::from_safe_string(html.clone()));
        }
        self.env.render_str(&self.source, ctx)
    }

    /// Render a one-off snippet with the same escaping rules.
    pub fn render_snippet<S: serde::Serialize>(source: &str, ctx: S) -> Result<String, minijinja::Error> {
        html_environment().render_str(source, ctx)
    }
}
