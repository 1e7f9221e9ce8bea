use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::trace;

use crate::util::{get_api_key, get_config_dir, get_listen};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentConfig {
    /// Directory holding the `instance-<uuid>.conf` files
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    #[serde(default)]
    pub api_key: String,

    /// Control-plane entry links by name (e.g. `instances`)
    #[serde(default)]
    pub links: HashMap<String, String>,

    /// Address of the command API
    #[serde(default = "crate::util::get_default_listen")]
    pub listen: SocketAddr,
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("./config")
}

impl AgentConfig {
    /// Apply `AGENT_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = get_config_dir() {
            self.config_dir = dir;
        }
        if let Some(key) = get_api_key() {
            self.api_key = key;
        }
        if let Some(listen) = get_listen() {
            self.listen = listen;
        }
        self
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<AgentConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str::<AgentConfig>(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .map(AgentConfig::with_env_overrides)
        .inspect(|config| trace!("loaded config: {config:?}"))
}
