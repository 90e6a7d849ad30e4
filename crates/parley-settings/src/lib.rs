//! Layered configuration for the parley service.
//!
//! 1. compiled defaults ([`ParleySettings::default()`])
//! 2. `~/.parley/settings.json`, deep-merged over the defaults
//! 3. `PARLEY_*` environment variables
//!
//! Then [`ParleySettings::validate`] fails fast on anything unusable.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;
mod validate;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, data_dir, deep_merge, load_settings,
    load_settings_from_path, read_settings_file, settings_path,
};
pub use types::*;

impl ParleySettings {
    /// Database location with relative paths resolved under [`data_dir`].
    pub fn resolved_db_path(&self) -> std::path::PathBuf {
        let raw = std::path::Path::new(&self.store.db_path);
        if self.store.db_path == ":memory:" || raw.is_absolute() {
            raw.to_path_buf()
        } else {
            data_dir().join(raw)
        }
    }
}
