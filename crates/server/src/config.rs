use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub max_body_bytes: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/scoring.db".into(),
            max_body_bytes: 64 * 1024,
            log_filter: "info".into(),
        }
    }
}

/// Defaults, then `server.toml`, then environment variables.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<toml::Table>(raw) else {
        tracing::warn!(file = SETTINGS_FILE, "ignoring unparsable settings file");
        return;
    };
    if let Some(v) = file_cfg.get("bind_addr").and_then(|v| v.as_str()) {
        settings.server_bind = v.to_string();
    }
    if let Some(v) = file_cfg.get("database_url").and_then(|v| v.as_str()) {
        settings.database_url = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("max_body_bytes")
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
    {
        settings.max_body_bytes = v;
    }
    if let Some(v) = file_cfg.get("log_filter").and_then(|v| v.as_str()) {
        settings.log_filter = v.to_string();
    }
}

pub(crate) fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("APP__MAX_BODY_BYTES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_body_bytes = parsed;
        }
    }

    if let Some(v) = lookup("RUST_LOG") {
        settings.log_filter = v;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
