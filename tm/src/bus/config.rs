//! Event bus configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default history ring capacity (messages)
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Number of published messages kept for diagnostics/replay
    #[serde(rename = "history-capacity", default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Optional JSONL journal of every published message
    #[serde(rename = "journal-path", default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            journal_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert_eq!(config.history_capacity, 1000);
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: BusConfig = serde_yaml::from_str("journal-path: /tmp/bus.jsonl").unwrap();
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.journal_path, Some(PathBuf::from("/tmp/bus.jsonl")));
    }
}
