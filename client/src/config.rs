//! Configuration file parser for Burrow
//!
//! `burrow.yml` holds a `relay:` section for `burrow server` and an `agent:`
//! section for `burrow client`. Every field is optional; command-line
//! arguments override whatever the file sets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use burrow_relay::RelayConfig;
use burrow_shared::protocol::DEFAULT_MAX_BODY;
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurrowConfig {
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// Tunnel agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the relay's client-facing listener
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Base URL of the service requests are forwarded to
    #[serde(default = "default_target_url")]
    pub target_url: String,

    /// Pause between polls that returned nothing
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Seconds the relay may hold a poll open (0 = plain polling)
    #[serde(default)]
    pub long_poll_secs: u64,

    /// Deadline for the forwarded call to the target
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_secs: u64,

    /// Largest target response relayed; anything bigger becomes a 502
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_server_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_target_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_poll_interval() -> u64 {
    50
}

fn default_forward_timeout() -> u64 {
    30
}

fn default_max_body() -> usize {
    DEFAULT_MAX_BODY
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            target_url: default_target_url(),
            poll_interval_ms: default_poll_interval(),
            long_poll_secs: 0,
            forward_timeout_secs: default_forward_timeout(),
            max_body_bytes: default_max_body(),
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    /// Validate URLs and timeouts
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("server_url", &self.server_url), ("target_url", &self.target_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("{} must be an http(s) URL, got '{}'", name, url);
            }
        }
        if self.forward_timeout_secs == 0 {
            anyhow::bail!("forward_timeout_secs must be positive");
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be positive");
        }
        Ok(())
    }
}

impl BurrowConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<PathBuf> {
        let candidates = ["burrow.yml", "burrow.yaml", ".burrow.yml", ".burrow.yaml"];

        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }

    /// Explicit path if given, otherwise the first file found, otherwise defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit.map(Path::to_path_buf).or_else(Self::find_config) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
relay:
  client_addr: 127.0.0.1:7000
  external_addr: 0.0.0.0:80
  response_timeout_secs: 10
agent:
  server_url: http://relay.internal:7000
  target_url: http://localhost:5000
  long_poll_secs: 20
"#;
        let config: BurrowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.relay.client_addr, "127.0.0.1:7000");
        assert_eq!(config.relay.response_timeout_secs, 10);
        assert_eq!(config.relay.max_pending, 1024);
        assert_eq!(config.agent.target_url, "http://localhost:5000");
        assert_eq!(config.agent.long_poll_secs, 20);
        assert_eq!(config.agent.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.agent.max_body_bytes, DEFAULT_MAX_BODY);
        assert!(config.agent.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: BurrowConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.agent.server_url, "http://127.0.0.1:9000");
        assert!(config.relay.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_http_url() {
        let config = AgentConfig {
            target_url: "localhost:3000".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_body_limit() {
        let yaml = "agent:\n  max_body_bytes: 4096\n";
        let config: BurrowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.agent.max_body_bytes, 4096);

        let config = AgentConfig {
            max_body_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
