//! Object store: name lookup, streamed download and in-place replacement of
//! remote files. `DriveClient` implements it over the Google Drive v3 API.

pub mod auth;
pub mod error;
mod responses;

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};

pub use error::StoreError;
use responses::{ApiErrorEnvelope, FileList};

/// Google Sheets document type; sources are looked up with this filter and
/// uploads convert back into it.
pub const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
/// Export format of fetched sources.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// Owned stream of byte chunks, used for every transfer so large assets are
/// never buffered whole.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolve `name` (optionally restricted to `mime`) to exactly one id.
    async fn find(&self, name: &str, mime: Option<&str>) -> Result<String, StoreError>;

    /// Stream the content of `id`, converted to `export_mime` when given.
    async fn download(&self, id: &str, export_mime: Option<&str>)
        -> Result<ByteStream, StoreError>;

    /// Replace content and metadata of the existing file `id`.
    async fn replace(
        &self,
        id: &str,
        name: &str,
        mime: &str,
        content_mime: &str,
        content: Vec<u8>,
    ) -> Result<(), StoreError>;
}

pub struct DriveClient {
    client: Client,
    access_token: String,
}

impl std::fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveClient")
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Escape a value for use inside a single-quoted Drive query literal.
fn quote_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn build_find_query(name: &str, mime: Option<&str>) -> String {
    let mut q = format!("name = '{}'", quote_query_value(name));
    if let Some(mime) = mime {
        q.push_str(&format!(" and mimeType = '{}'", quote_query_value(mime)));
    }
    q.push_str(" and trashed = false");
    q
}

/// Assemble a `multipart/related` body: JSON metadata part, then media part.
fn build_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    content_mime: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: {content_mime}\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

impl DriveClient {
    pub fn new(client: Client, access_token: String) -> Self {
        Self {
            client,
            access_token,
        }
    }

    /// Turn a non-2xx reply into `StoreError::HttpStatus`, extracting the
    /// Google error message when the body carries one.
    async fn check(response: Response, context: &str) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|env| env.error.message)
            .unwrap_or_else(|_| body.trim().to_string());
        Err(StoreError::HttpStatus {
            status: status.as_u16(),
            context: context.to_string(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStore for DriveClient {
    async fn find(&self, name: &str, mime: Option<&str>) -> Result<String, StoreError> {
        let query = build_find_query(name, mime);
        let response = self
            .client
            .get(FILES_URL)
            .bearer_auth(&self.access_token)
            .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
            .send()
            .await?;
        let list: FileList = Self::check(response, "files.list").await?.json().await?;

        match list.files.len() {
            0 => Err(StoreError::NotFound {
                name: name.to_string(),
            }),
            1 => Ok(list.files[0].id.clone()),
            count => {
                tracing::warn!(file = %name, "Ambiguous file name, candidates:");
                for candidate in &list.files {
                    tracing::warn!("  {}\t{}", candidate.id, candidate.name);
                }
                Err(StoreError::Ambiguous {
                    name: name.to_string(),
                    count,
                })
            }
        }
    }

    async fn download(
        &self,
        id: &str,
        export_mime: Option<&str>,
    ) -> Result<ByteStream, StoreError> {
        let request = match export_mime {
            Some(mime) => self
                .client
                .get(format!("{}/{}/export", FILES_URL, id))
                .query(&[("mimeType", mime)]),
            None => self
                .client
                .get(format!("{}/{}", FILES_URL, id))
                .query(&[("alt", "media")]),
        };
        let response = request.bearer_auth(&self.access_token).send().await?;
        let response = Self::check(response, "files.get").await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        Ok(Box::pin(stream))
    }

    async fn replace(
        &self,
        id: &str,
        name: &str,
        mime: &str,
        content_mime: &str,
        content: Vec<u8>,
    ) -> Result<(), StoreError> {
        let boundary = format!("sheetsync-{:016x}", rand::random::<u64>());
        let metadata = serde_json::json!({ "name": name, "mimeType": mime });
        let body = build_related_body(&boundary, &metadata, content_mime, &content);

        let response = self
            .client
            .patch(format!("{}/{}", UPLOAD_URL, id))
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;
        Self::check(response, "files.update").await?;
        Ok(())
    }
}
