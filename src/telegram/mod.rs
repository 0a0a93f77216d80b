//! Messaging gateway: outbound text/file messages and inbound update polling.
//! `TelegramClient` implements it over the Telegram Bot API.

pub mod error;
mod responses;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;

use crate::drive::ByteStream;
pub use error::GatewayError;
use responses::{ApiResponse, RawUpdate, SentMessage};

const API_BASE: &str = "https://api.telegram.org";

/// Record id reported when the API accepted a message but did not echo its id.
const UNKNOWN_MESSAGE_ID: &str = "?";

/// One inbound message as seen by the bot poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub sender_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub text: String,
    /// Unix seconds.
    pub timestamp: i64,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        match raw.message {
            Some(message) => Update {
                update_id: raw.update_id,
                sender_id: message.from.map(|u| u.id),
                chat_id: Some(message.chat.id),
                text: message.text.unwrap_or_default(),
                timestamp: message.date,
            },
            None => Update {
                update_id: raw.update_id,
                sender_id: None,
                chat_id: None,
                text: String::new(),
                timestamp: 0,
            },
        }
    }
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send HTML text; returns the message id.
    async fn send_text(&self, chat: &str, text: &str) -> Result<String, GatewayError>;

    /// Send a file read from `content` with an HTML caption; returns the
    /// message id.
    async fn send_file(
        &self,
        chat: &str,
        filename: &str,
        content: ByteStream,
        caption: &str,
    ) -> Result<String, GatewayError>;

    /// Updates with an id strictly greater than `offset`. Blocks up to
    /// `timeout` waiting for new ones.
    async fn poll_updates(&self, offset: i64, timeout: Duration)
        -> Result<Vec<Update>, GatewayError>;
}

pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(client: Client, token: String) -> Self {
        Self {
            client,
            api_base: API_BASE.to_string(),
            token,
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<Option<T>, GatewayError> {
        let bytes = response.bytes().await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)?;
        unwrap_envelope(envelope)
    }
}

fn unwrap_envelope<T>(envelope: ApiResponse<T>) -> Result<Option<T>, GatewayError> {
    if !envelope.ok {
        return Err(GatewayError::Api {
            code: envelope.error_code.unwrap_or_default(),
            description: envelope
                .description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    Ok(envelope.result)
}

fn message_id(sent: Option<SentMessage>) -> String {
    sent.and_then(|m| m.message_id)
        .map(|id| id.to_string())
        .unwrap_or_else(|| UNKNOWN_MESSAGE_ID.to_string())
}

#[async_trait]
impl MessagingGateway for TelegramClient {
    async fn send_text(&self, chat: &str, text: &str) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;
        Ok(message_id(Self::parse(response).await?))
    }

    async fn send_file(
        &self,
        chat: &str,
        filename: &str,
        content: ByteStream,
        caption: &str,
    ) -> Result<String, GatewayError> {
        let part = Part::stream(Body::wrap_stream(content)).file_name(filename.to_string());
        let form = Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("audio", part);
        let response = self
            .client
            .post(self.method_url("sendAudio"))
            .multipart(form)
            .send()
            .await?;
        Ok(message_id(Self::parse(response).await?))
    }

    async fn poll_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, GatewayError> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", (offset + 1).to_string()),
                ("timeout", timeout.as_secs().to_string()),
            ])
            // leave headroom over the server-side long-poll window
            .timeout(timeout + Duration::from_secs(10))
            .send()
            .await?;
        let raw: Option<Vec<RawUpdate>> = Self::parse(response).await?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .map(Update::from)
            .collect())
    }
}
