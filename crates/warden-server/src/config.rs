use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use warden_client::{ClientOptions, DEFAULT_MAX_CONCURRENT_CHECKS};
use warden_core::allowlist::AllowlistPolicy;

use crate::roles::RoleAuthority;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub backend: BackendConfig,
    pub identity: IdentityConfig,
    pub allowlist: AllowlistConfig,
    pub roles: RolesConfig,
    pub service: ServiceConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub read_url: String,
    pub write_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_concurrent_checks: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub admin_url: String,
    pub user_header: String,
}

/// Raw comma-separated allowlist entries, parsed at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AllowlistConfig {
    pub public: String,
    pub mutation: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub namespace: String,
    pub object: String,
    pub admin_relation: String,
    pub banned_relation: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub private_key_path: Option<PathBuf>,
    pub leeway_secs: u64,
    pub trusted_keys: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            read_url: "http://127.0.0.1:4466".to_string(),
            write_url: "http://127.0.0.1:4467".to_string(),
            api_key: None,
            timeout_secs: 10,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            admin_url: "http://127.0.0.1:4434".to_string(),
            user_header: "x-user-id".to_string(),
        }
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            namespace: "platform".to_string(),
            object: "authority".to_string(),
            admin_relation: "admins".to_string(),
            banned_relation: "banned".to_string(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "warden".to_string(),
            private_key_path: None,
            leeway_secs: 0,
            trusted_keys: BTreeMap::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WARDEN_HTTP_HOST") {
            self.http.host = v;
        }
        if let Ok(v) = std::env::var("WARDEN_HTTP_PORT")
            && let Ok(port) = v.parse()
        {
            self.http.port = port;
        }
        if let Ok(v) = std::env::var("WARDEN_BACKEND_READ_URL") {
            self.backend.read_url = v;
        }
        if let Ok(v) = std::env::var("WARDEN_BACKEND_WRITE_URL") {
            self.backend.write_url = v;
        }
        if let Ok(v) = std::env::var("WARDEN_BACKEND_API_KEY") {
            self.backend.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("WARDEN_BACKEND_MAX_CONCURRENT_CHECKS")
            && let Ok(n) = v.parse()
        {
            self.backend.max_concurrent_checks = n;
        }
        if let Ok(v) = std::env::var("WARDEN_IDENTITY_ADMIN_URL") {
            self.identity.admin_url = v;
        }
        if let Ok(v) = std::env::var("WARDEN_PUBLIC_ALLOWLIST") {
            self.allowlist.public = v;
        }
        if let Ok(v) = std::env::var("WARDEN_MUTATION_ALLOWLIST") {
            self.allowlist.mutation = v;
        }
        if let Ok(v) = std::env::var("WARDEN_SERVICE_NAME") {
            self.service.name = v;
        }
        if let Ok(v) = std::env::var("WARDEN_SERVICE_PRIVATE_KEY_PATH") {
            self.service.private_key_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("WARDEN_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("WARDEN_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "http.port must be non-zero".to_string(),
            ));
        }
        if self.backend.max_concurrent_checks == 0 {
            return Err(ConfigError::Validation(
                "backend.max_concurrent_checks must be non-zero".to_string(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "backend.timeout_secs must be non-zero".to_string(),
            ));
        }
        for (name, value) in [
            ("backend.read_url", &self.backend.read_url),
            ("backend.write_url", &self.backend.write_url),
            ("identity.admin_url", &self.identity.admin_url),
            ("identity.user_header", &self.identity.user_header),
            ("service.name", &self.service.name),
            ("roles.namespace", &self.roles.namespace),
            ("roles.object", &self.roles.object),
            ("roles.admin_relation", &self.roles.admin_relation),
            ("roles.banned_relation", &self.roles.banned_relation),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        if axum::http::HeaderName::from_bytes(self.identity.user_header.as_bytes()).is_err() {
            return Err(ConfigError::Validation(format!(
                "identity.user_header '{}' is not a valid header name",
                self.identity.user_header
            )));
        }
        self.allowlist_policy()?;
        Ok(())
    }

    pub fn allowlist_policy(&self) -> Result<AllowlistPolicy, ConfigError> {
        AllowlistPolicy::from_specs(&self.allowlist.public, &self.allowlist.mutation)
            .map_err(|e| ConfigError::Validation(format!("allowlist: {e}")))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_key: self.backend.api_key.clone(),
            timeout: Duration::from_secs(self.backend.timeout_secs),
            ..ClientOptions::default()
        }
    }

    pub fn role_authority(&self) -> RoleAuthority {
        RoleAuthority {
            namespace: self.roles.namespace.clone(),
            object: self.roles.object.clone(),
            admin_relation: self.roles.admin_relation.clone(),
            banned_relation: self.roles.banned_relation.clone(),
        }
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
