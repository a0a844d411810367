//! Load — config loading from file and environment variables.

use std::path::Path;
use std::fs::File;
use std::io::Read;

use super::model::AgentConfig;

impl AgentConfig {
    /// Load configuration from file or environment variables.
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("AGENT_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/nodeagent/agent.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!(
                "Config file not found at {}, using defaults/environment variables",
                config_path
            );
            Self::default()
        };

        if let Ok(bind) = std::env::var("NM_BIND_ADDRESS") {
            config.bind_address = bind;
        }
        if let Ok(dirs) = std::env::var("NM_LOCAL_DIRS") {
            config.local_dirs = dirs.split(',').map(std::path::PathBuf::from).collect();
        }
        if let Ok(enabled) = std::env::var("NM_SECURITY_ENABLED") {
            if let Ok(v) = enabled.parse() {
                config.security_enabled = v;
            }
        }
        if let Ok(v) = std::env::var("NM_KILL_GRACE_MILLIS") {
            if let Ok(v) = v.parse() {
                config.kill_grace_millis = v;
            }
        }
        if let Ok(v) = std::env::var("NM_KILL_FORCE_MILLIS") {
            if let Ok(v) = v.parse() {
                config.kill_force_millis = v;
            }
        }
        if let Ok(v) = std::env::var("NM_CACHE_BYTES_TARGET") {
            if let Ok(v) = v.parse() {
                config.cache_bytes_target = v;
            }
        }

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: AgentConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}
