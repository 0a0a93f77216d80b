//! Access-token loading for the Drive adapter.
//!
//! The token file is produced by an external bootstrap (the interactive
//! browser consent flow is not part of this tool). When it carries a refresh
//! token, a fresh access token is requested for every export and written back.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::responses::{ClientSecrets, RefreshResponse};
use crate::layout::Layout;

/// Stored OAuth token. Unknown keys are carried through untouched so the
/// file stays readable by whatever tool created it.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Load the token file and, if possible, refresh it.
///
/// Returns the access token for the current run.
pub async fn load_access_token(
    client: &Client,
    credentials_file: &Path,
    token_file: &Path,
    layout: &Layout,
) -> Result<String> {
    let raw = tokio::fs::read_to_string(token_file)
        .await
        .with_context(|| format!("Failed to read token file {}", token_file.display()))?;
    let mut token: StoredToken = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse token file {}", token_file.display()))?;

    let Some(refresh_token) = token.refresh_token.clone() else {
        tracing::debug!("Token file has no refresh token, using stored access token");
        return Ok(token.access_token);
    };

    let secrets_raw = tokio::fs::read_to_string(credentials_file)
        .await
        .with_context(|| {
            format!(
                "Failed to read client secret file {}",
                credentials_file.display()
            )
        })?;
    let secrets: ClientSecrets = serde_json::from_str(&secrets_raw)
        .context("Failed to parse client secret file")?;
    let secret = secrets.installed;

    let response = client
        .post(&secret.token_uri)
        .form(&[
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .context("Token refresh request failed")?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Token refresh rejected (HTTP {}): {}", status, body.trim());
    }
    let refreshed: RefreshResponse = response
        .json()
        .await
        .context("Failed to decode token refresh response")?;

    token.access_token = refreshed.access_token;
    if let Some(token_type) = refreshed.token_type {
        token.token_type = Some(token_type);
    }
    if let Some(secs) = refreshed.expires_in {
        token.expiry = Some((Utc::now() + Duration::seconds(secs)).to_rfc3339());
    }

    let serialized = serde_json::to_vec_pretty(&token)?;
    layout
        .write_file(token_file, &serialized)
        .await
        .with_context(|| format!("Failed to save token file {}", token_file.display()))?;
    tracing::debug!("Access token refreshed and saved to {}", token_file.display());

    Ok(token.access_token)
}
