use std::sync::Arc;

use tracing::{debug, instrument};

use tandem_core::models::{Message, MAX_MESSAGE_CHARS};
use tandem_core::{ChatError, ConnectionId, UserId};
use tandem_store::ChatStore;

use crate::lifecycle::observe;

#[derive(Clone, Copy, Debug)]
pub struct RelayLimits {
    pub max_message_length: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_message_length: MAX_MESSAGE_CHARS,
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

/// Validates and persists chat messages and serves history.
#[derive(Clone)]
pub struct MessageRelay {
    store: Arc<dyn ChatStore>,
    limits: RelayLimits,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn ChatStore>, limits: RelayLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> RelayLimits {
        self.limits
    }

    /// Length is counted in Unicode scalar values on the raw input; the
    /// stored content is trimmed.
    pub fn validate_content<'a>(&self, content: &'a str) -> Result<&'a str, ChatError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyContent);
        }
        let len = content.chars().count();
        if len > self.limits.max_message_length {
            return Err(ChatError::ContentTooLong {
                len,
                max: self.limits.max_message_length,
            });
        }
        Ok(trimmed)
    }

    #[instrument(skip(self, content), fields(connection_id = %connection_id, sender_id = %sender_id))]
    pub fn send(
        &self,
        connection_id: ConnectionId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, ChatError> {
        let text = self.validate_content(content)?;
        let message = observe(
            "send_message",
            self.store.append_message(connection_id, sender_id, text),
        )?;
        debug!(message_id = %message.id, "message stored");
        Ok(message)
    }

    /// Messages ascending by timestamp; `offset` counts back from the newest.
    pub fn history(
        &self,
        connection_id: ConnectionId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Message>, ChatError> {
        let limit = limit
            .unwrap_or(self.limits.default_page_size)
            .clamp(1, self.limits.max_page_size);
        Ok(self.store.messages(connection_id, limit, offset.unwrap_or(0))?)
    }
}
