use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::access::Role;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub graph: GraphConfig,
    pub webhook: WebhookConfig,
    pub dispatch: DispatchConfig,
    pub routing: RoutingConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Static API tokens. Each token is bound to one workspace and role.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<ApiToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub workspace_id: String,
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.relay-hub/state.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub base_url: String,
    pub api_version: String,
    pub timeout_seconds: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".to_string(),
            api_version: "v21.0".to_string(),
            timeout_seconds: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub path: String,
    pub app_secret: Option<String>,
    pub verify_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: "/v1/webhooks/meta".to_string(),
            app_secret: None,
            verify_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub batch_size: i64,
    pub throttle_ms: u64,
    pub backoff_ms: u64,
    pub max_attempts: u32,
    pub dry_run: bool,
    pub worker_enabled: bool,
    pub poll_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            throttle_ms: 250,
            backoff_ms: 1200,
            max_attempts: 3,
            dry_run: false,
            worker_enabled: false,
            poll_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Used when a workspace has no settings row.
    pub auto_route_default: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            auto_route_default: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub campaign_runs_per_window: u32,
    pub sends_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            campaign_runs_per_window: 30,
            sends_per_window: 120,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("RELAY_HUB_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.relay-hub/relay-hub.json"))
}

pub fn load_config() -> Config {
    let mut cfg = load_config_from(&resolve_config_path());
    apply_env_overrides(&mut cfg);
    cfg
}

/// Reads a config file. A missing or unparsable file yields the defaults.
pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Config>(&raw) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(path = %path.display(), "ignoring unparsable config: {err}");
                Config::default()
            }
        },
        Err(err) => {
            tracing::warn!(path = %path.display(), "cannot read config: {err}");
            Config::default()
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(url) = non_empty_env("RELAY_HUB_DATABASE_URL") {
        cfg.database.url = Some(url);
    }
    if let Some(path) = non_empty_env("RELAY_HUB_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }
    if let Some(secret) = non_empty_env("RELAY_HUB_APP_SECRET") {
        cfg.webhook.app_secret = Some(secret);
    }
    if let Some(token) = non_empty_env("RELAY_HUB_VERIFY_TOKEN") {
        cfg.webhook.verify_token = Some(token);
    }
    if let Some(url) = non_empty_env("RELAY_HUB_GRAPH_BASE_URL") {
        cfg.graph.base_url = url;
    }
    if let Some(flag) = non_empty_env("RELAY_HUB_DRY_RUN") {
        cfg.dispatch.dry_run = parse_flag(&flag);
    }
}

pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}
