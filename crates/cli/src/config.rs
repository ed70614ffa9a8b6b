use gateway::{BackendKind, ConnectionOptions, Credentials, TlsOptions};
use proto::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "mq-gateway.toml";

/// Top-level application configuration loaded from TOML + env overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub browse: BrowseConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
}

/// Queue manager connection settings (`[backend]`).
///
/// Environment overrides: `MQ_QMGR`, `MQ_CHANNEL`, `MQ_HOST`, `MQ_PORT`,
/// `MQ_USER`, `MQ_PASSWORD`.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_queue_manager")]
    pub queue_manager: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Queues defined on the in-process queue manager.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_queue_manager() -> String {
    "QM1".to_string()
}

fn default_channel() -> String {
    "DEV.APP.SVRCONN".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_backend_port() -> u16 {
    1414
}

fn default_user() -> String {
    "app".to_string()
}

fn default_queues() -> Vec<String> {
    (1..=3).map(|i| format!("DEV.QUEUE.{i}")).collect()
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("queue_manager", &self.queue_manager)
            .field("channel", &self.channel)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("queues", &self.queues)
            .field("tls", &self.tls)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            queue_manager: default_queue_manager(),
            channel: default_channel(),
            host: default_host(),
            port: default_backend_port(),
            user: default_user(),
            password: String::new(),
            queues: default_queues(),
            tls: TlsConfig::default(),
        }
    }
}

/// Channel TLS settings (`[backend.tls]`).
///
/// Environment overrides: `MQ_TLS_ENABLED`, `MQ_SSLCIPH`, `MQ_KEY_REPOSITORY`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cipher_spec: String,
    #[serde(default)]
    pub key_repository: String,
}

/// Browse session settings (`[browse]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseConfig {
    /// Idle seconds before a browse session is closed (`MQ_BROWSE_TTL_SECS`).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Background sweep period in seconds. 0 disables the sweeper.
    #[serde(default)]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: 0,
        }
    }
}

impl BrowseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// REST adapter settings (`[rest]`, `REST_PORT`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_rest_port")]
    pub port: u16,
}

fn default_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_rest_port() -> u16 {
    8080
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_rest_port(),
        }
    }
}

impl RestConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("rest.bind", &self.bind, self.port)
    }
}

/// QUIC RPC adapter settings (`[rpc]`, `RPC_PORT`).
///
/// Without `cert_path`/`key_path` a self-signed localhost certificate is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_rpc_port")]
    pub port: u16,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

fn default_rpc_port() -> u16 {
    9090
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_rpc_port(),
            cert_path: None,
            key_path: None,
        }
    }
}

impl RpcConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("rpc.bind", &self.bind, self.port)
    }
}

fn socket_addr(field: &str, bind: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let ip: IpAddr = bind.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{bind}' is not an IP address"),
    })?;
    Ok(SocketAddr::new(ip, port))
}

/// Parses a port given as `8080` or `:8080`.
pub fn parse_port(field: &str, value: &str) -> Result<u16, ConfigError> {
    let digits = value.trim().trim_start_matches(':');
    match digits.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{value}' is not a valid port"),
        }),
    }
}

/// Parses a boolean flag value. Unrecognized text yields `None`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let cwd = std::env::current_dir().ok()?.join(LOCAL_CONFIG_FILE);
            if cwd.exists() {
                return Some(cwd);
            }
            let home_config = Self::home_dir()?.join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        config.apply_env_overrides()?;

        debug!(
            qmgr = %config.backend.queue_manager,
            conn = %format!("{}({})", config.backend.host, config.backend.port),
            rest_port = config.rest.port,
            rpc_port = config.rpc.port,
            "Config loaded"
        );
        Ok(config)
    }

    /// `~/.mq-gateway`, when `HOME` is set.
    pub fn home_dir() -> Option<PathBuf> {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join(".mq-gateway"))
    }

    /// Parses a TOML file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Environment variable overrides (highest priority).
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let backend = &mut self.backend;
        if let Some(qmgr) = env_string("MQ_QMGR") {
            backend.queue_manager = qmgr;
        }
        if let Some(channel) = env_string("MQ_CHANNEL") {
            backend.channel = channel;
        }
        if let Some(host) = env_string("MQ_HOST") {
            backend.host = host;
        }
        if let Some(port) = env_string("MQ_PORT") {
            backend.port = parse_port("MQ_PORT", &port)?;
        }
        if let Some(user) = env_string("MQ_USER") {
            backend.user = user;
        }
        if let Some(password) = env_string("MQ_PASSWORD") {
            backend.password = password;
        }

        if let Some(flag) = env_string("MQ_TLS_ENABLED") {
            match parse_bool(&flag) {
                Some(enabled) => backend.tls.enabled = enabled,
                None => warn!(value = %flag, "Ignoring unrecognized MQ_TLS_ENABLED value"),
            }
        }
        if let Some(cipher) = env_string("MQ_SSLCIPH") {
            backend.tls.cipher_spec = cipher;
        }
        if let Some(repo) = env_string("MQ_KEY_REPOSITORY") {
            backend.tls.key_repository = repo;
        }

        if let Some(ttl) = env_string("MQ_BROWSE_TTL_SECS") {
            self.browse.ttl_secs = ttl.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "MQ_BROWSE_TTL_SECS".to_string(),
                reason: format!("'{ttl}' is not a number of seconds"),
            })?;
        }
        if let Some(port) = env_string("REST_PORT") {
            self.rest.port = parse_port("REST_PORT", &port)?;
        }
        if let Some(port) = env_string("RPC_PORT") {
            self.rpc.port = parse_port("RPC_PORT", &port)?;
        }
        Ok(())
    }

    /// Builds validated backend connection options.
    pub fn to_connection_options(&self) -> Result<ConnectionOptions, ConfigError> {
        let backend = &self.backend;
        let credentials = (!backend.user.is_empty()).then(|| Credentials {
            user: backend.user.clone(),
            password: backend.password.clone(),
        });
        let options = ConnectionOptions {
            kind: backend.kind,
            host: backend.host.clone(),
            port: backend.port,
            channel: backend.channel.clone(),
            queue_manager: backend.queue_manager.clone(),
            credentials,
            tls: TlsOptions {
                enabled: backend.tls.enabled,
                cipher_spec: backend.tls.cipher_spec.clone(),
                key_repository: backend.tls.key_repository.clone(),
            },
            queues: backend.queues.clone(),
        };
        options.validate()?;
        Ok(options)
    }
}
