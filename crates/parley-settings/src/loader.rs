//! Settings loading: compiled defaults, then `~/.parley/settings.json`
//! deep-merged on top, then `PARLEY_*` environment overrides.
//!
//! Unlike the file layer, a malformed environment value is an error rather than
//! being ignored, so a typo in deployment config stops the process at startup.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ParleySettings, PartialPolicy};

/// `~/.parley`
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley")
}

pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Missing file means defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without environment overrides.
pub fn read_settings_file(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Objects merge recursively; arrays and scalars are replaced; nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut ParleySettings) -> Result<()> {
    apply_overrides_from(settings, |name| std::env::var(name).ok())
}

/// Apply overrides using `lookup` in place of the process environment.
pub fn apply_overrides_from<F>(settings: &mut ParleySettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = get("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = get("PARLEY_PORT") {
        settings.server.port = parse_u16_range(&v, 0, 65535).ok_or_else(|| invalid("PARLEY_PORT", &v))?;
    }
    if let Some(v) = get("PARLEY_CONTEXT_WINDOW") {
        settings.conversation.context_window =
            parse_usize_range(&v, 0, 1_000).ok_or_else(|| invalid("PARLEY_CONTEXT_WINDOW", &v))?;
    }
    if let Some(v) = get("PARLEY_DEFAULT_RESPONDER") {
        settings.responders.default_responder = v;
    }
    if let Some(v) = get("PARLEY_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = get("PARLEY_PARTIAL_POLICY") {
        settings.conversation.partial_policy =
            v.parse::<PartialPolicy>().map_err(|_| invalid("PARLEY_PARTIAL_POLICY", &v))?;
    }
    if let Some(v) = get("PARLEY_GENERATOR_URL") {
        settings.generator.base_url = v;
    }
    if let Some(v) = get("PARLEY_GENERATOR_MODEL") {
        settings.generator.model = v;
    }
    if let Some(v) = get("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = get("PARLEY_JSON_LOGS") {
        settings.logging.json = parse_bool(&v).ok_or_else(|| invalid("PARLEY_JSON_LOGS", &v))?;
    }
    Ok(())
}

fn invalid(name: &str, value: &str) -> SettingsError {
    SettingsError::InvalidValue(format!("{name}={value:?}"))
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
