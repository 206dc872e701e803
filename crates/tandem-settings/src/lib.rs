//! # tandem-settings
//!
//! Layered configuration for the Tandem server:
//! 1. **Compiled defaults** ([`TandemSettings::default()`])
//! 2. **Settings file** (`~/.tandem/settings.json`, deep-merged)
//! 3. **Environment** (`TANDEM_*`, highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
