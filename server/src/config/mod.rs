use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::auth_token::HashAlgorithm;
use crate::dispatch::CheckOrder;
use crate::error::{Result, ShopServerError};
use crate::routing::{Role, RouteConfigError, RouteTable};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_uri")]
    pub uri: String,
    #[serde(default = "default_database_name")]
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            uri: default_database_uri(),
            name: default_database_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// Normally left empty in the file and supplied through `AUTH_SECRET`.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default)]
    pub cookie_domain: Option<String>,
    #[serde(default)]
    pub check_order: CheckOrder,
}

impl AuthSettings {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            algorithm: HashAlgorithm::default(),
            token_ttl_secs: default_token_ttl_secs(),
            cookie_domain: None,
            check_order: CheckOrder::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

/// One `[[routes]]` entry, in declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteEntry {
    pub pattern: String,
    pub handler: String,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub required_role: Role,
    #[serde(default)]
    pub body_optional: bool,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub rate_limited: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database_name() -> String {
    "greenhouse".to_string()
}

fn default_token_ttl_secs() -> u64 {
    24 * 3600
}

fn default_max_requests() -> usize {
    crate::middleware::rate_limit::DEFAULT_MAX_REQUESTS
}

fn default_window_secs() -> u64 {
    crate::middleware::rate_limit::DEFAULT_WINDOW.as_secs()
}

impl ServerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ShopServerError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ShopServerError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Environment variables win over the file for deployment-specific values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            self.database.uri = uri;
        }
        if let Ok(name) = std::env::var("DATABASE_NAME") {
            self.database.name = name;
        }
        if let Ok(secret) = std::env::var("AUTH_SECRET") {
            self.auth.secret = secret;
        }
        if let Ok(domain) = std::env::var("COOKIE_DOMAIN") {
            self.auth.cookie_domain = Some(domain);
        }
    }

    pub fn route_table(&self) -> std::result::Result<RouteTable, RouteConfigError> {
        RouteTable::from_config(&self.routes)
    }
}
