use serde::{Deserialize, Serialize};

use super::RetrySettings;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Relative paths resolve under `~/.parley`. `:memory:` keeps everything in RAM.
    pub db_path: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub retry: RetrySettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "parley.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
            retry: RetrySettings::default(),
        }
    }
}
