//! AgentConfig — the recognized `nm.*` options.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `nm.bindAddress` — "host:port" for the RPC server.
    #[serde(rename = "nm.bindAddress")]
    pub bind_address: String,

    /// `nm.localDirs` — local storage roots for localized resources.
    #[serde(rename = "nm.localDirs")]
    pub local_dirs: Vec<PathBuf>,

    /// `nm.security.enabled` — enables token-based request authentication.
    /// Verification itself is an external collaborator; this flag only
    /// decides whether the facade consults it.
    #[serde(rename = "nm.security.enabled")]
    pub security_enabled: bool,

    /// `nm.killGraceMillis` — KILL escalation: graceful phase duration.
    #[serde(rename = "nm.killGraceMillis")]
    pub kill_grace_millis: u64,

    /// `nm.killForceMillis` — KILL escalation: forced phase duration.
    #[serde(rename = "nm.killForceMillis")]
    pub kill_force_millis: u64,

    /// `nm.cacheBytesTarget` — eviction threshold for the PUBLIC cache.
    #[serde(rename = "nm.cacheBytesTarget")]
    pub cache_bytes_target: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8041".to_string(),
            local_dirs: vec![PathBuf::from("/var/lib/nodeagent/nm-local")],
            security_enabled: false,
            kill_grace_millis: 2_000,
            kill_force_millis: 10_000,
            cache_bytes_target: 10 * 1024 * 1024 * 1024,
        }
    }
}

impl AgentConfig {
    /// Validate configuration values are sane.
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_address.is_empty() {
            return Err("nm.bindAddress must not be empty".to_string());
        }
        if self.local_dirs.is_empty() {
            return Err("nm.localDirs must contain at least one directory".to_string());
        }
        if self.kill_grace_millis == 0 {
            return Err("nm.killGraceMillis must be > 0".to_string());
        }
        if self.kill_force_millis == 0 {
            return Err("nm.killForceMillis must be > 0".to_string());
        }
        if self.cache_bytes_target == 0 {
            return Err("nm.cacheBytesTarget must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_bind_address() {
        let mut cfg = AgentConfig::default();
        cfg.bind_address = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_local_dirs() {
        let mut cfg = AgentConfig::default();
        cfg.local_dirs.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_cache_bytes_target() {
        let mut cfg = AgentConfig::default();
        cfg.cache_bytes_target = 0;
        assert!(cfg.validate().is_err());
    }
}
