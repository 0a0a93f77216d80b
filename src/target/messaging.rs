use std::sync::Arc;

use super::asset::AssetCache;
use super::error::TargetError;
use super::template::Template;
use super::Row;
use crate::drive::ObjectStore;
use crate::telegram::MessagingGateway;

/// Posts one message per row to a channel: an audio file with the rendered
/// template as caption when the row names one, plain text otherwise.
pub struct MessagingTarget {
    id: String,
    channel: String,
    template: Template,
    cache: AssetCache,
    gateway: Arc<dyn MessagingGateway>,
}

impl std::fmt::Debug for MessagingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingTarget")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl MessagingTarget {
    pub fn new(
        id: String,
        channel: String,
        template: Template,
        cache: AssetCache,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Self {
        Self {
            id,
            channel,
            template,
            cache,
            gateway,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn insert(&self, row: &Row, store: &dyn ObjectStore) -> Result<String, TargetError> {
        let body = self.template.render(row, &[])?;
        let message_id = match row.get("audio").filter(|a| !a.is_empty()) {
            Some(audio) => {
                let asset = self.cache.open(audio, store).await?;
                self.gateway
                    .send_file(&self.channel, &asset.name, asset.stream, &body)
                    .await?
            }
            None => self.gateway.send_text(&self.channel, &body).await?,
        };
        tracing::debug!(target_id = %self.id, message_id = %message_id, "Posted message");
        Ok(message_id)
    }
}
