//! Request correlator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_FALLBACK_RESPONSE: &str = "No response available";

/// Request correlator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Call deadline used when the caller gives none
    #[serde(rename = "default-timeout-ms", default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Response handed to a caller whose call timed out
    #[serde(rename = "fallback-response", default = "default_fallback_response")]
    pub fallback_response: String,
}

fn default_timeout_ms() -> u64 {
    90_000
}

fn default_fallback_response() -> String {
    DEFAULT_FALLBACK_RESPONSE.to_string()
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            fallback_response: default_fallback_response(),
        }
    }
}

impl CorrelatorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CorrelatorConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(90));
        assert_eq!(config.fallback_response, "No response available");
    }
}
