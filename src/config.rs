//! Hierarchical configuration (C1).
//!
//! Loaded once at startup via a layered [`figment::Figment`]: compiled-in
//! defaults, then an optional TOML file (cwd, then XDG config dir, then
//! `/etc/aico-gateway/`), then `AICO_`-prefixed environment variables. Every
//! other component receives a read-only `Arc<Config>` and never re-reads the
//! environment itself.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub bus: BusConfig,
    pub router: RouterConfig,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub websocket: WebSocketConfig,
    pub local_ipc: LocalIpcConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl ServiceConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_host")]
    pub bind_host: String,
    #[serde(default = "default_pub_port")]
    pub pub_port: u16,
    #[serde(default = "default_sub_port")]
    pub sub_port: u16,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
}

impl BusConfig {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }
    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub topic_mapping: std::collections::BTreeMap<String, String>,
    #[serde(default = "default_router_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl RouterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_sqlite_path")]
    pub database_url: String,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: u32,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
    #[serde(default = "default_cleanup_age_days")]
    pub cleanup_age_days: i64,
}

impl SessionConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,
}

impl RateLimitConfig {
    pub fn refill_rate_per_sec(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub blocked_ips: Vec<String>,
    #[serde(default = "default_true")]
    pub sanitize_input: bool,
    #[serde(default = "default_true")]
    pub block_suspicious_patterns: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalIpcConfig {
    #[serde(default = "default_ipc_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_ipc_fallback_port")]
    pub fallback_tcp_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_deny_list")]
    pub deny_list: Vec<String>,
    #[serde(default = "default_persistence_batch_size")]
    pub persistence_batch_size: usize,
}

// ---- default value functions ----

fn default_service_name() -> String {
    "aico-gateway".to_string()
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8771
}
fn default_api_prefix() -> String {
    "/api/v1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_shutdown_grace_secs() -> u64 {
    1
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_bus_host() -> String {
    "127.0.0.1".to_string()
}
fn default_pub_port() -> u16 {
    8770
}
fn default_sub_port() -> u16 {
    8772
}
fn default_reconnect_base_ms() -> u64 {
    250
}
fn default_reconnect_cap_ms() -> u64 {
    5_000
}
fn default_router_timeout_secs() -> u64 {
    30
}
fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}
fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}
fn default_jwt_issuer() -> String {
    "aico-api-gateway".to_string()
}
fn default_access_ttl_secs() -> i64 {
    15 * 60
}
fn default_refresh_ttl_secs() -> i64 {
    7 * 24 * 3600
}
fn default_sqlite_path() -> String {
    "sqlite://aico-gateway.db".to_string()
}
fn default_max_sessions_per_user() -> u32 {
    10
}
fn default_cleanup_interval_hours() -> u64 {
    24
}
fn default_cleanup_age_days() -> i64 {
    30
}
fn default_requests_per_minute() -> u32 {
    100
}
fn default_burst_size() -> u32 {
    20
}
fn default_cleanup_interval_minutes() -> u64 {
    5
}
fn default_max_request_size() -> usize {
    10 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_connections() -> usize {
    1000
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_max_frame_size() -> usize {
    10 * 1024 * 1024
}
fn default_ipc_socket_path() -> String {
    "/tmp/aico_gateway.sock".to_string()
}
fn default_ipc_fallback_port() -> u16 {
    8082
}
fn default_buffer_capacity() -> usize {
    1000
}
fn default_deny_list() -> Vec<String> {
    vec!["logging.consumer".to_string(), "logging.transport".to_string()]
}
fn default_persistence_batch_size() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: default_service_name(),
                host: default_api_host(),
                port: default_api_port(),
                api_prefix: default_api_prefix(),
                log_level: default_log_level(),
                environment: default_environment(),
                shutdown_grace_secs: default_shutdown_grace_secs(),
                cors_allowed_origins: default_cors_origins(),
            },
            bus: BusConfig {
                bind_host: default_bus_host(),
                pub_port: default_pub_port(),
                sub_port: default_sub_port(),
                reconnect_base_ms: default_reconnect_base_ms(),
                reconnect_cap_ms: default_reconnect_cap_ms(),
            },
            router: RouterConfig {
                topic_mapping: Default::default(),
                timeout_secs: default_router_timeout_secs(),
                max_message_size: default_max_message_size(),
            },
            jwt: JwtConfig {
                algorithm: default_jwt_algorithm(),
                issuer: default_jwt_issuer(),
                access_ttl_secs: default_access_ttl_secs(),
                refresh_ttl_secs: default_refresh_ttl_secs(),
            },
            session: SessionConfig {
                database_url: default_sqlite_path(),
                max_sessions_per_user: default_max_sessions_per_user(),
                cleanup_interval_hours: default_cleanup_interval_hours(),
                cleanup_age_days: default_cleanup_age_days(),
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: default_requests_per_minute(),
                burst_size: default_burst_size(),
                cleanup_interval_minutes: default_cleanup_interval_minutes(),
            },
            security: SecurityConfig {
                max_request_size: default_max_request_size(),
                allowed_ips: Vec::new(),
                blocked_ips: Vec::new(),
                sanitize_input: true,
                block_suspicious_patterns: true,
            },
            websocket: WebSocketConfig {
                path: default_ws_path(),
                max_connections: default_max_connections(),
                heartbeat_interval_secs: default_heartbeat_interval_secs(),
                max_frame_size: default_max_frame_size(),
            },
            local_ipc: LocalIpcConfig {
                socket_path: default_ipc_socket_path(),
                fallback_tcp_port: default_ipc_fallback_port(),
            },
            logging: LoggingConfig {
                buffer_capacity: default_buffer_capacity(),
                deny_list: default_deny_list(),
                persistence_batch_size: default_persistence_batch_size(),
            },
        }
    }
}

impl Config {
    /// Load configuration from all sources: defaults, then TOML file (first
    /// found wins), then `AICO_`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!(path = %path.display(), "loading configuration file");
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("AICO_").split("_"));

        Ok(figment.extract()?)
    }

    /// Load configuration from a specific file, bypassing XDG/system search.
    /// Used by integration tests.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("AICO_").split("_"))
            .extract()?;
        Ok(config)
    }

    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("aico-gateway.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("aico-gateway");
        if let Ok(path) = xdg_dirs.place_config_file(Path::new("config.toml")) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/aico-gateway/config.toml"));
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.service.port, 8771);
        assert_eq!(config.bus.pub_port, 8770);
        assert_eq!(config.bus.sub_port, 8772);
        assert_eq!(config.jwt.algorithm, "HS256");
        assert_eq!(config.jwt.access_ttl_secs, 900);
        assert_eq!(config.rate_limit.burst_size, 20);
        assert_eq!(config.logging.buffer_capacity, 1000);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("AICO_SERVICE_PORT", "9999");
        let config = Config::load().expect("config loads with env override");
        assert_eq!(config.service.port, 9999);
        std::env::remove_var("AICO_SERVICE_PORT");
    }
}
