use std::net::SocketAddr;
use std::path::Path;

use contracts::{ConfigError, SimulationConfig};
use thiserror::Error;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_SQLITE_PATH: &str = "authority.sqlite";
pub const DEV_TOKEN_SECRET: &str = "authority-dev-secret";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid listen address {addr}: {source}")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Process-level settings for `serve`.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub sqlite_path: String,
    pub token_secret: String,
    /// Static bearer token accepted by the admin routes.
    pub admin_token: Option<String>,
    pub config: SimulationConfig,
}

impl ServerSettings {
    /// Reads `AUTHORITY_*` variables. `addr` and `config_path` win over the
    /// environment when given.
    pub fn from_env(addr: Option<&str>, config_path: Option<&str>) -> Result<Self, SettingsError> {
        let addr = addr
            .map(str::to_string)
            .or_else(|| env_setting("AUTHORITY_ADDR"))
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr
            .parse()
            .map_err(|source| SettingsError::Addr { addr, source })?;

        let config_path = config_path
            .map(str::to_string)
            .or_else(|| env_setting("AUTHORITY_CONFIG"));
        let config = match config_path {
            Some(path) => load_config_file(path)?,
            None => SimulationConfig::default(),
        };
        config.validate()?;

        Ok(Self {
            addr,
            sqlite_path: env_setting("AUTHORITY_SQLITE_PATH")
                .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string()),
            token_secret: token_secret(),
            admin_token: env_setting("AUTHORITY_ADMIN_TOKEN"),
            config,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.token_secret == DEV_TOKEN_SECRET
    }
}

pub fn token_secret() -> String {
    env_setting("AUTHORITY_TOKEN_SECRET").unwrap_or_else(|| DEV_TOKEN_SECRET.to_string())
}

pub fn load_config_file(path: impl AsRef<Path>) -> Result<SimulationConfig, SettingsError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn env_setting(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
