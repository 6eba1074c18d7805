//! Relay configuration

use std::time::Duration;

use burrow_shared::protocol::DEFAULT_MAX_BODY;
use burrow_shared::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listener for the tunnel agent; keep it off the public network
    #[serde(default = "default_client_addr")]
    pub client_addr: String,

    /// Public listener for external callers
    #[serde(default = "default_external_addr")]
    pub external_addr: String,

    /// How long an external caller waits for its response
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    /// Outstanding ids (queued, in flight or answered) before callers get 503
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Largest request or response body relayed
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,

    /// Upper bound on `GET /poll?wait=`
    #[serde(default = "default_max_long_poll")]
    pub max_long_poll_secs: u64,
}

fn default_client_addr() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_external_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_response_timeout() -> u64 {
    30
}

fn default_max_pending() -> usize {
    1024
}

fn default_max_body() -> usize {
    DEFAULT_MAX_BODY
}

fn default_max_long_poll() -> u64 {
    30
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            client_addr: default_client_addr(),
            external_addr: default_external_addr(),
            response_timeout_secs: default_response_timeout(),
            max_pending: default_max_pending(),
            max_body_bytes: default_max_body(),
            max_long_poll_secs: default_max_long_poll(),
        }
    }
}

impl RelayConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Largest `POST /response` body: base64 inflates the payload by a third.
    pub fn max_submission_bytes(&self) -> usize {
        self.max_body_bytes / 3 * 4 + 64 * 1024
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_addr.is_empty() || self.external_addr.is_empty() {
            return Err(Error::Config("listen addresses cannot be empty".into()));
        }
        if self.client_addr == self.external_addr {
            return Err(Error::Config(format!(
                "client and external listeners share address {}",
                self.client_addr
            )));
        }
        if self.response_timeout_secs == 0 {
            return Err(Error::Config("response_timeout_secs must be positive".into()));
        }
        if self.max_pending == 0 || self.max_body_bytes == 0 {
            return Err(Error::Config("max_pending and max_body_bytes must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_shared_address() {
        let config = RelayConfig {
            client_addr: "127.0.0.1:8080".into(),
            external_addr: "127.0.0.1:8080".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_json() {
        let config: RelayConfig = serde_json::from_str(r#"{"max_pending": 4}"#).unwrap();
        assert_eq!(config.max_pending, 4);
        assert_eq!(config.max_long_poll_secs, 30);
    }
}
