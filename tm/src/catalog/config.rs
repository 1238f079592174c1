//! Capability catalog configuration

use serde::{Deserialize, Serialize};

/// Relative weights of each scoring term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(rename = "name-match", default = "default_name_match")]
    pub name_match: f64,

    #[serde(default = "default_security")]
    pub security: f64,

    /// Fraction of `security` awarded when the level is below the minimum
    #[serde(rename = "security-penalty", default = "default_security_penalty")]
    pub security_penalty: f64,

    #[serde(rename = "success-rate", default = "default_success_rate")]
    pub success_rate: f64,

    #[serde(default = "default_load")]
    pub load: f64,

    #[serde(default = "default_cost")]
    pub cost: f64,

    #[serde(default = "default_latency")]
    pub latency: f64,
}

fn default_name_match() -> f64 {
    0.4
}

fn default_security() -> f64 {
    0.2
}

fn default_security_penalty() -> f64 {
    0.3
}

fn default_success_rate() -> f64 {
    0.15
}

fn default_load() -> f64 {
    0.10
}

fn default_cost() -> f64 {
    0.10
}

fn default_latency() -> f64 {
    0.05
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            name_match: default_name_match(),
            security: default_security(),
            security_penalty: default_security_penalty(),
            success_rate: default_success_rate(),
            load: default_load(),
            cost: default_cost(),
            latency: default_latency(),
        }
    }
}

impl ScoreWeights {
    /// Highest score any capability can reach
    pub fn max_score(&self) -> f64 {
        self.name_match + self.security + self.success_rate + self.load + self.cost + self.latency
    }

    fn all(&self) -> [f64; 7] {
        [
            self.name_match,
            self.security,
            self.security_penalty,
            self.success_rate,
            self.load,
            self.cost,
            self.latency,
        ]
    }
}

/// Capability catalog configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Candidates scoring below this are excluded
    #[serde(rename = "min-score", default = "default_min_score")]
    pub min_score: f64,

    /// EMA smoothing factor applied to success rate and latency
    #[serde(rename = "smoothing-factor", default = "default_smoothing_factor")]
    pub smoothing_factor: f64,

    #[serde(default)]
    pub weights: ScoreWeights,
}

fn default_min_score() -> f64 {
    0.3
}

fn default_smoothing_factor() -> f64 {
    0.1
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            smoothing_factor: default_smoothing_factor(),
            weights: ScoreWeights::default(),
        }
    }
}

impl CatalogConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            eyre::bail!(
                "catalog.smoothing-factor must be in (0, 1], got {}",
                self.smoothing_factor
            );
        }
        if self.weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            eyre::bail!("catalog.weights must be non-negative");
        }
        if !self.min_score.is_finite() || self.min_score < 0.0 {
            eyre::bail!("catalog.min-score must be non-negative, got {}", self.min_score);
        }
        Ok(())
    }
}
