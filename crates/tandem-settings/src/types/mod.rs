//! Settings type definitions.
//!
//! All types use camelCase keys and `#[serde(default)]`, so a partial JSON
//! file only needs the values it changes.

mod chat;
mod logging;
mod server;

pub use chat::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use tandem_core::models::MAX_MESSAGE_CHARS;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 4000 },
///   "chat": { "disconnectGraceSecs": 10 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TandemSettings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub chat: ChatSettings,
    pub logging: LoggingSettings,
}

impl TandemSettings {
    /// Reject combinations that parse fine but cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if self.server.client_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(
                "server.clientTimeoutSecs must exceed heartbeatIntervalSecs".into(),
            ));
        }
        if !(1..=MAX_MESSAGE_CHARS).contains(&self.chat.max_message_length) {
            return Err(SettingsError::InvalidValue(format!(
                "chat.maxMessageLength must be between 1 and {MAX_MESSAGE_CHARS}"
            )));
        }
        if self.chat.default_page_size == 0 || self.chat.max_page_size < self.chat.default_page_size {
            return Err(SettingsError::InvalidValue(
                "chat.maxPageSize must be >= defaultPageSize >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        TandemSettings::default().validate().unwrap();
    }

    #[test]
    fn zero_queue_is_rejected() {
        let mut s = TandemSettings::default();
        s.server.max_send_queue = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn page_sizes_must_be_ordered() {
        let mut s = TandemSettings::default();
        s.chat.max_page_size = 10;
        assert!(s.validate().is_err());
    }

    #[test]
    fn message_length_is_capped() {
        let mut s = TandemSettings::default();
        s.chat.max_message_length = MAX_MESSAGE_CHARS + 1;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
        s.chat.max_message_length = 0;
        assert!(s.validate().is_err());
        s.chat.max_message_length = 500;
        s.validate().unwrap();
    }

    #[test]
    fn timeout_must_exceed_heartbeat() {
        let mut s = TandemSettings::default();
        s.server.client_timeout_secs = s.server.heartbeat_interval_secs;
        assert!(s.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(TandemSettings::default()).unwrap();
        assert_eq!(v["server"]["maxSendQueue"], 256);
        assert_eq!(v["chat"]["recentMessagesLimit"], 50);
        assert_eq!(v["logging"]["level"], "info");
    }
}
