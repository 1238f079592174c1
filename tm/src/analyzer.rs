//! Request analysis - decides whether a caller's message becomes a Task

use async_trait::async_trait;
use eyre::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::domain::{Payload, Priority};

/// What a message asks for, when it maps to a task category
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub category: String,
    /// Scheduler default when `None`
    pub priority: Option<Priority>,
    /// Scheduler default when `None`
    pub max_retries: Option<u32>,
    pub parameters: Payload,
}

/// Maps a caller's free-form message onto a task, or `None` for a direct request
#[async_trait]
pub trait RequestAnalyzer: Send + Sync {
    async fn analyze(&self, owner_id: &str, message: &str) -> eyre::Result<Option<Analysis>>;
}

/// One analyzer rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerRule {
    pub category: String,

    /// Regexes; the first match wins and its named groups become parameters
    pub patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(rename = "max-retries", default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl AnalyzerRule {
    pub fn new(category: impl Into<String>, patterns: &[&str]) -> Self {
        Self {
            category: category.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            priority: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<AnalyzerRule>,
}

fn default_rules() -> Vec<AnalyzerRule> {
    vec![
        AnalyzerRule::new("echo", &[r"(?i)^echo\s+(?P<text>.+)$"]),
        AnalyzerRule::new(
            "transfer",
            &[r"(?i)\b(?:send|transfer)\s+(?P<amount>\d+(?:\.\d+)?)\s*(?P<asset>[a-z]+)?(?:\s+to\s+(?P<recipient>\S+))?"],
        )
        .with_priority(Priority::High)
        .with_max_retries(2),
        AnalyzerRule::new("balance", &[r"(?i)\bbalance\b"]).with_priority(Priority::Medium),
        AnalyzerRule::new("report", &[r"(?i)^(?:report|summari[sz]e)\b"]).with_priority(Priority::Low),
        AnalyzerRule::new("swap", &[r"(?i)\bswap\b"]),
    ]
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self { rules: default_rules() }
    }
}

/// Regex-rule analyzer; rules are tried in order
#[derive(Debug)]
pub struct RuleAnalyzer {
    rules: Vec<(AnalyzerRule, Vec<Regex>)>,
}

impl RuleAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> eyre::Result<Self> {
        debug!(rules = config.rules.len(), "RuleAnalyzer::new: called");
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let compiled = rule
                    .patterns
                    .iter()
                    .map(|p| Regex::new(p).context(format!("Invalid pattern for category '{}': {}", rule.category, p)))
                    .collect::<eyre::Result<Vec<_>>>()?;
                Ok((rule.clone(), compiled))
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    fn matching(&self, message: &str) -> Option<Analysis> {
        for (rule, patterns) in &self.rules {
            for pattern in patterns {
                let Some(captures) = pattern.captures(message) else {
                    continue;
                };
                let mut parameters = Payload::new();
                parameters.insert("message".to_string(), json!(message));
                for name in pattern.capture_names().flatten() {
                    if let Some(value) = captures.name(name) {
                        parameters.insert(name.to_string(), json!(value.as_str()));
                    }
                }
                return Some(Analysis {
                    category: rule.category.clone(),
                    priority: rule.priority,
                    max_retries: rule.max_retries,
                    parameters,
                });
            }
        }
        None
    }
}

#[async_trait]
impl RequestAnalyzer for RuleAnalyzer {
    async fn analyze(&self, owner_id: &str, message: &str) -> eyre::Result<Option<Analysis>> {
        let analysis = self.matching(message);
        debug!(%owner_id, category = ?analysis.as_ref().map(|a| &a.category), "RuleAnalyzer::analyze: done");
        Ok(analysis)
    }
}
