//! Domain services over the store: the user directory, the connection
//! lifecycle state machine and the message relay.

pub mod directory;
pub mod lifecycle;
pub mod listener;
pub mod relay;

pub use directory::UserDirectory;
pub use lifecycle::LifecycleManager;
pub use listener::{LifecycleEvent, LifecycleListener, RecordingListener};
pub use relay::{MessageRelay, RelayLimits};
