//! Client configuration (TOML-based).

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gateway_protocol::{ClientInfo, DEFAULT_PORT, roles, scopes};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConnectionError;

const CONFIG_FILE_NAME: &str = "gatewayctl.toml";
const STATE_DIR_NAME: &str = ".gatewayctl";

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Where the gateway listens
    #[serde(default)]
    pub gateway: GatewayEndpoint,
    /// How this client describes itself during `connect`
    #[serde(default)]
    pub client: ClientSettings,
    /// Requested role and scopes
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Location of the device identity and token cache
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Force `wss` (true) or `ws` (false). Unset picks `ws` for loopback
    /// hosts and `wss` for everything else.
    #[serde(default)]
    pub tls: Option<bool>,
    /// Shared gateway token used when no device token is cached
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_client_id")]
    pub id: String,
    #[serde(default = "default_client_mode")]
    pub mode: String,
    #[serde(default = "default_client_version")]
    pub version: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_role")]
    pub role: String,
    /// Sent and signed in this order
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Socket open plus first challenge
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Each correlated call, `connect` included
    #[serde(default = "default_call_ms")]
    pub call_ms: u64,
    /// Default completion wait
    #[serde(default = "default_completion_ms")]
    pub completion_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON format logging
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// --- Defaults ---

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_client_id() -> String {
    "cli".into()
}
fn default_client_mode() -> String {
    "cli".into()
}
fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}
fn default_platform() -> String {
    std::env::consts::OS.into()
}
fn default_role() -> String {
    roles::OPERATOR.into()
}
fn default_scopes() -> Vec<String> {
    vec![scopes::READ.into(), scopes::WRITE.into()]
}
fn default_connect_ms() -> u64 {
    10_000
}
fn default_call_ms() -> u64 {
    30_000
}
fn default_completion_ms() -> u64 {
    600_000
}
fn default_log_level() -> String {
    "warn".into()
}

/// `~/.gatewayctl`, or `./.gatewayctl` when no home directory is known.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
}

pub fn default_config_path() -> PathBuf {
    default_state_dir().join(CONFIG_FILE_NAME)
}

/// Loopback hosts are reachable without TLS.
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

impl Default for GatewayEndpoint {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: None,
            token: None,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            mode: default_client_mode(),
            version: default_client_version(),
            platform: default_platform(),
            display_name: None,
            instance_id: None,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            role: default_role(),
            scopes: default_scopes(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            call_ms: default_call_ms(),
            completion_ms: default_completion_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl GatewayEndpoint {
    pub fn uses_tls(&self) -> bool {
        self.tls.unwrap_or_else(|| !is_loopback_host(&self.host))
    }

    /// `ws://host:port` or `wss://host:port`. IPv6 literals are bracketed.
    pub fn url(&self) -> Result<Url, ConnectionError> {
        let scheme = if self.uses_tls() { "wss" } else { "ws" };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let raw = format!("{scheme}://{host}:{}", self.port);
        Url::parse(&raw).map_err(|e| ConnectionError::InvalidUrl {
            url: raw,
            reason: e.to_string(),
        })
    }
}

impl ClientSettings {
    pub fn to_client_info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            version: self.version.clone(),
            platform: self.platform.clone(),
            mode: self.mode.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.id, self.version)
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    pub fn completion(&self) -> Duration {
        Duration::from_millis(self.completion_ms)
    }
}

impl StateConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_state_dir)
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, or from the default config path, falling back to
    /// defaults when the file does not exist. A file that exists but does not
    /// parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config_path = default_config_path();
                if config_path.exists() {
                    Self::load(&config_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject values the handshake cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.port == 0 {
            anyhow::bail!("gateway.port must not be 0");
        }
        for (field, value) in [
            ("client.id", &self.client.id),
            ("client.mode", &self.client.mode),
            ("client.version", &self.client.version),
            ("client.platform", &self.client.platform),
            ("auth.role", &self.auth.role),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{field} must not be empty");
            }
        }
        if let Some(scope) = self.auth.scopes.iter().find(|scope| scope.contains(',')) {
            anyhow::bail!("scope {scope:?} must not contain ','");
        }
        for (field, value) in [
            ("timeouts.connect_ms", self.timeouts.connect_ms),
            ("timeouts.call_ms", self.timeouts.call_ms),
            ("timeouts.completion_ms", self.timeouts.completion_ms),
        ] {
            if value == 0 {
                anyhow::bail!("{field} must be greater than 0");
            }
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
