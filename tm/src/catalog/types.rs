//! Capability catalog types

use serde::{Deserialize, Serialize};

use crate::domain::Payload;

/// Security level on the ordinal scale `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown security level: {}", s)),
        }
    }
}

/// One function a worker declares it can perform
///
/// `success_rate`, `current_load` and `cost` live in `[0, 1]`. The metric
/// fields are owned by the catalog once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCapability {
    pub worker_id: String,
    pub capability_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub security_level: SecurityLevel,

    #[serde(default = "default_latency_ms")]
    pub estimated_latency_ms: f64,

    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    #[serde(default)]
    pub current_load: f64,

    #[serde(default)]
    pub cost: f64,

    /// Capability names that must be available before this one can run
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_latency_ms() -> f64 {
    1000.0
}

fn default_success_rate() -> f64 {
    1.0
}

impl WorkerCapability {
    pub fn new(worker_id: impl Into<String>, capability_name: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            capability_name: capability_name.into(),
            description: String::new(),
            security_level: SecurityLevel::default(),
            estimated_latency_ms: default_latency_ms(),
            success_rate: default_success_rate(),
            current_load: 0.0,
            cost: 0.0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_security(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.estimated_latency_ms = latency_ms;
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate;
        self
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.current_load = load;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Clamp the unit-interval fields into `[0, 1]` and latency to `>= 0`
    pub(crate) fn normalize(&mut self) {
        self.success_rate = unit(self.success_rate);
        self.current_load = unit(self.current_load);
        self.cost = unit(self.cost);
        if !self.estimated_latency_ms.is_finite() || self.estimated_latency_ms < 0.0 {
            self.estimated_latency_ms = 0.0;
        }
    }
}

pub(crate) fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// What a task needs from a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub capability: String,

    #[serde(default)]
    pub min_security: SecurityLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,

    /// Free-form context, carried for analyzers and logging
    #[serde(default)]
    pub context: Payload,

    /// Only score capabilities whose name equals `capability`
    #[serde(default = "default_exact_match")]
    pub exact_match: bool,
}

fn default_exact_match() -> bool {
    true
}

impl Requirement {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            min_security: SecurityLevel::default(),
            max_latency_ms: None,
            context: Payload::new(),
            exact_match: true,
        }
    }

    pub fn with_min_security(mut self, level: SecurityLevel) -> Self {
        self.min_security = level;
        self
    }

    pub fn with_max_latency_ms(mut self, max_latency_ms: f64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    pub fn with_context(mut self, context: Payload) -> Self {
        self.context = context;
        self
    }

    /// Score every registered capability, not just exact name matches
    pub fn any_capability(mut self) -> Self {
        self.exact_match = false;
        self
    }
}

/// A scored match returned by the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub worker_id: String,
    pub capability: WorkerCapability,
    pub score: f64,
}

/// An observed outcome fed back into the catalog
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricsUpdate {
    pub success: bool,
    pub latency_ms: Option<f64>,
    /// Point-in-time load gauge; replaces `current_load` when present
    pub load: Option<f64>,
}

impl MetricsUpdate {
    pub fn success(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            load: None,
        }
    }

    pub fn failure(latency_ms: f64) -> Self {
        Self {
            success: false,
            latency_ms: Some(latency_ms),
            load: None,
        }
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.load = Some(load);
        self
    }
}
