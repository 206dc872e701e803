use serde::{Deserialize, Serialize};
use tandem_core::models::MAX_MESSAGE_CHARS;

/// Chat behavior limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Maximum message length in Unicode scalar values. Capped at
    /// `MAX_MESSAGE_CHARS`.
    pub max_message_length: usize,
    /// Messages returned alongside the current connection on login.
    pub recent_messages_limit: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Delay before a dropped last transport tears down the active
    /// connection. `0` disconnects immediately.
    pub disconnect_grace_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: MAX_MESSAGE_CHARS,
            recent_messages_limit: 50,
            default_page_size: 50,
            max_page_size: 200,
            disconnect_grace_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ChatSettings::default();
        assert_eq!(c.max_message_length, 1000);
        assert_eq!(c.recent_messages_limit, 50);
        assert_eq!(c.disconnect_grace_secs, 0);
    }

    #[test]
    fn camel_case_keys() {
        let c: ChatSettings =
            serde_json::from_str(r#"{"disconnectGraceSecs": 15, "maxPageSize": 500}"#).unwrap();
        assert_eq!(c.disconnect_grace_secs, 15);
        assert_eq!(c.max_page_size, 500);
        assert_eq!(c.default_page_size, 50);
    }
}
