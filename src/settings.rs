//! Application settings storage
//!
//! Stores configuration like API keys in a JSON file in the app data directory.
//! Environment variables take precedence over stored values.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const DEFAULT_BIND: &str = "0.0.0.0:3741";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_META_API_VERSION: &str = "v19.0";

/// Which category store backs the server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Bundled taxonomy held in memory, history lost on restart
    #[default]
    Memory,
    Sqlite,
}

impl StoreBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "hardcoded" => Some(StoreBackend::Memory),
            "sqlite" | "db" => Some(StoreBackend::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default)]
    pub meta_access_token: Option<String>,
    #[serde(default)]
    pub meta_ad_account_id: Option<String>,
    #[serde(default = "default_meta_api_version")]
    pub meta_api_version: String,
    #[serde(default)]
    pub store_backend: StoreBackend,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Outbound HTTP timeout for LLM and Meta calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_gemini_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_meta_api_version() -> String {
    DEFAULT_META_API_VERSION.to_string()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: default_gemini_model(),
            meta_access_token: None,
            meta_ad_account_id: None,
            meta_api_version: default_meta_api_version(),
            store_backend: StoreBackend::Memory,
            db_path: None,
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Non-empty environment variable
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Load settings from disk or create default
    fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::warn!("[Settings] Ignoring unreadable {}: {}", path.display(), e);
                    Settings::default()
                }),
                Err(_) => Settings::default(),
            }
        } else {
            Settings::default()
        }
    }

    /// Save settings to disk
    fn save(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;

        Ok(())
    }

    /// Apply environment overrides
    fn with_env(mut self) -> Self {
        if let Some(key) = env_var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(model) = env_var("GEMINI_MODEL") {
            self.gemini_model = model;
        }
        if let Some(token) = env_var("META_ACCESS_TOKEN") {
            self.meta_access_token = Some(token);
        }
        if let Some(account) = env_var("META_AD_ACCOUNT_ID") {
            self.meta_ad_account_id = Some(account);
        }
        if let Some(version) = env_var("META_API_VERSION") {
            self.meta_api_version = version;
        }
        if let Some(backend) = env_var("TARGETWISE_STORE").and_then(|s| StoreBackend::from_str(&s)) {
            self.store_backend = backend;
        }
        if let Some(path) = env_var("TARGETWISE_DB") {
            self.db_path = Some(path);
        }
        if let Some(bind) = env_var("TARGETWISE_BIND") {
            self.bind = bind;
        }
        self
    }

    pub fn has_gemini_key(&self) -> bool {
        self.gemini_api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    pub fn has_meta_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
        present(&self.meta_access_token) && present(&self.meta_ad_account_id)
    }
}

/// What is on disk, and what the process runs with (disk plus env overrides)
struct Layers {
    file: Settings,
    effective: Settings,
}

/// Settings plus the file they persist to, shared by the server.
/// Only the file layer is ever written back, so env values never leak to disk.
pub struct SettingsStore {
    path: PathBuf,
    layers: RwLock<Layers>,
}

impl SettingsStore {
    /// Load `settings.json` from `config_dir`, then apply env overrides
    pub fn load(config_dir: &Path) -> Self {
        let path = config_dir.join("settings.json");
        let file = Settings::load(&path);
        let effective = file.clone().with_env();
        Self { path, layers: RwLock::new(Layers { file, effective }) }
    }

    /// Settings that never touch disk, for tests and one-shot tools
    pub fn ephemeral(settings: Settings) -> Self {
        Self {
            path: PathBuf::new(),
            layers: RwLock::new(Layers { file: settings.clone(), effective: settings }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Settings {
        self.layers
            .read()
            .map(|l| l.effective.clone())
            .unwrap_or_default()
    }

    /// Store Meta credentials and persist them. They apply to this process
    /// right away; on the next start env values win again.
    pub fn set_meta_credentials(&self, access_token: String, ad_account_id: String) -> Result<(), String> {
        let mut guard = self.layers.write()
            .map_err(|_| "Failed to acquire settings lock")?;
        guard.effective.meta_access_token = Some(access_token.clone());
        guard.effective.meta_ad_account_id = Some(ad_account_id.clone());
        guard.file.meta_access_token = Some(access_token);
        guard.file.meta_ad_account_id = Some(ad_account_id);

        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        guard.file.save(&self.path)?;
        log::info!("[Settings] Meta credentials saved to {}", self.path.display());
        Ok(())
    }
}

/// Default config directory, e.g. ~/.local/share/com.targetwise.app
pub fn default_config_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("com.targetwise.app"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve the SQLite path: explicit argument, then settings/env, then a
/// `.targetwise.db` in the working directory or one of its parents, then the
/// default config dir.
pub fn find_database(db_arg: Option<&str>, settings: &Settings) -> PathBuf {
    if let Some(path) = db_arg.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(path) = settings.db_path.as_deref().filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        loop {
            let candidate = dir.join(".targetwise.db");
            if candidate.exists() {
                return candidate;
            }
            match dir.parent() {
                Some(p) => dir = p,
                None => break,
            }
        }
    }

    default_config_dir().join("targetwise.db")
}

/// Mask a secret for display (shows first/last 4 chars)
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings: Settings = serde_json::from_str(r#"{"gemini_api_key": "abc"}"#).unwrap();
        assert_eq!(settings.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(settings.bind, DEFAULT_BIND);
        assert_eq!(settings.store_backend, StoreBackend::Memory);
        assert!(settings.has_gemini_key());
        assert!(!settings.has_meta_credentials());
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!(StoreBackend::from_str("SQLite"), Some(StoreBackend::Sqlite));
        assert_eq!(StoreBackend::from_str("hardcoded"), Some(StoreBackend::Memory));
        assert_eq!(StoreBackend::from_str("firebase"), None);
    }

    #[test]
    fn test_meta_credentials_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path());
        store.set_meta_credentials("token-123456789".to_string(), "act_42".to_string()).unwrap();
        assert!(store.snapshot().has_meta_credentials());

        let reloaded = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(reloaded.meta_ad_account_id.as_deref(), Some("act_42"));
    }

    #[test]
    fn test_saving_credentials_leaves_env_values_off_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("TARGETWISE_BIND", "127.0.0.1:9999");
        let store = SettingsStore::load(dir.path());
        std::env::remove_var("TARGETWISE_BIND");
        assert_eq!(store.snapshot().bind, "127.0.0.1:9999");

        store.set_meta_credentials("token-123456789".to_string(), "act_42".to_string()).unwrap();
        assert_eq!(store.snapshot().bind, "127.0.0.1:9999");

        let content = fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(!content.contains("127.0.0.1:9999"));
        let saved = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(saved.bind, DEFAULT_BIND);
        assert_eq!(saved.meta_access_token.as_deref(), Some("token-123456789"));

        // with the env var gone the stored default applies again
        assert_eq!(SettingsStore::load(dir.path()).snapshot().bind, DEFAULT_BIND);
    }

    #[test]
    fn test_unreadable_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.bind, DEFAULT_BIND);
    }

    #[test]
    fn test_find_database_precedence() {
        let settings = Settings { db_path: Some("/tmp/from-settings.db".to_string()), ..Settings::default() };
        assert_eq!(find_database(Some("/tmp/arg.db"), &settings), PathBuf::from("/tmp/arg.db"));
        assert_eq!(find_database(None, &settings), PathBuf::from("/tmp/from-settings.db"));
        assert_eq!(find_database(Some(""), &settings), PathBuf::from("/tmp/from-settings.db"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcd1234efgh5678"), "abcd...5678");
        assert_eq!(mask_secret("short"), "*****");
    }
}
