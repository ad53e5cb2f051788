use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tck_agent::AgentConfig;
use tck_dispatcher::{DispatcherConfig, DEFAULT_DISPATCHER_ADDR};
use tck_manager::{ManagerConfig, DEFAULT_MANAGER_ADDR};
use tck_transport::TransportConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Harness configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TckConfig {
    pub dispatcher: DispatcherConfig,
    pub test_manager: ManagerConfig,
    pub agent: AgentSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub sdk_name: String,
    pub manager_addr: String,
    pub dispatcher_addr: String,
    /// Reply-to URI for requests issued by this agent.
    pub source: String,
    pub default_ttl_ms: u32,
    pub reply_to_requests: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        let agent = AgentConfig::default();
        let transport = TransportConfig::default();
        Self {
            sdk_name: agent.sdk_name,
            manager_addr: DEFAULT_MANAGER_ADDR.to_string(),
            dispatcher_addr: DEFAULT_DISPATCHER_ADDR.to_string(),
            source: transport.source,
            default_ttl_ms: transport.default_ttl_ms,
            reply_to_requests: agent.reply_to_requests,
        }
    }
}

impl AgentSection {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig { sdk_name: self.sdk_name.clone(), reply_to_requests: self.reply_to_requests }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig { source: self.source.clone(), default_ttl_ms: self.default_ttl_ms }
    }
}

impl TckConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }
}
