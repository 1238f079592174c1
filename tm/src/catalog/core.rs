//! Capability Catalog - scored worker capabilities and candidate selection

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::CatalogConfig;
use super::deps::{self, DepGraph};
use super::score::{rank, score};
use super::types::{Candidate, MetricsUpdate, Requirement, WorkerCapability};

/// Errors from catalog operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Invalid capability: {0}")]
    Invalid(String),

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
}

/// worker id -> capability name -> capability
type Entries = BTreeMap<String, BTreeMap<String, WorkerCapability>>;

/// Holds every worker capability and ranks them against requirements
pub struct CapabilityCatalog {
    config: CatalogConfig,
    entries: RwLock<Entries>,
}

impl CapabilityCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        debug!(?config, "CapabilityCatalog::new: called");
        Self {
            config,
            entries: RwLock::new(Entries::new()),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Add or replace a capability declaration
    pub fn register(&self, mut capability: WorkerCapability) -> Result<(), CatalogError> {
        debug!(
            worker_id = %capability.worker_id,
            capability = %capability.capability_name,
            "CapabilityCatalog::register: called"
        );
        if capability.worker_id.trim().is_empty() {
            return Err(CatalogError::Invalid("empty worker id".to_string()));
        }
        if capability.capability_name.trim().is_empty() {
            return Err(CatalogError::Invalid("empty capability name".to_string()));
        }
        capability.normalize();

        let mut entries = self.write();
        entries
            .entry(capability.worker_id.clone())
            .or_default()
            .insert(capability.capability_name.clone(), capability);
        Ok(())
    }

    /// Drop every capability of `worker_id`; returns how many were removed
    pub fn remove_worker(&self, worker_id: &str) -> usize {
        debug!(%worker_id, "CapabilityCatalog::remove_worker: called");
        let removed = self.write().remove(worker_id).map_or(0, |caps| caps.len());
        if removed > 0 {
            info!(%worker_id, removed, "Removed worker capabilities");
        }
        removed
    }

    pub fn capabilities_for(&self, worker_id: &str) -> Vec<WorkerCapability> {
        self.read()
            .get(worker_id)
            .map(|caps| caps.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, worker_id: &str, capability_name: &str) -> Option<WorkerCapability> {
        self.read()
            .get(worker_id)
            .and_then(|caps| caps.get(capability_name))
            .cloned()
    }

    /// Every registered capability, ordered by worker then name
    pub fn snapshot(&self) -> Vec<WorkerCapability> {
        self.read().values().flat_map(|caps| caps.values().cloned()).collect()
    }

    pub fn worker_count(&self) -> usize {
        self.read().len()
    }

    /// Score eligible capabilities against `requirement`, best first
    ///
    /// Capabilities scoring under `min-score`, or whose dependencies no
    /// registered capability provides, are excluded.
    pub fn find_candidates(&self, requirement: &Requirement) -> Vec<Candidate> {
        debug!(
            capability = %requirement.capability,
            min_security = %requirement.min_security,
            exact_match = requirement.exact_match,
            "CapabilityCatalog::find_candidates: called"
        );
        let entries = self.read();
        let provided: HashSet<&str> = entries
            .values()
            .flat_map(|caps| caps.keys().map(String::as_str))
            .collect();

        let mut candidates: Vec<Candidate> = entries
            .values()
            .flat_map(|caps| caps.values())
            .filter(|cap| !requirement.exact_match || cap.capability_name == requirement.capability)
            .filter(|cap| {
                let satisfied = cap.dependencies.iter().all(|d| provided.contains(d.as_str()));
                if !satisfied {
                    debug!(
                        worker_id = %cap.worker_id,
                        capability = %cap.capability_name,
                        "CapabilityCatalog::find_candidates: unmet dependencies"
                    );
                }
                satisfied
            })
            .map(|cap| Candidate {
                worker_id: cap.worker_id.clone(),
                capability: cap.clone(),
                score: score(cap, requirement, &self.config.weights),
            })
            .filter(|c| c.score >= self.config.min_score)
            .collect();
        drop(entries);

        rank(&mut candidates);
        debug!(count = candidates.len(), "CapabilityCatalog::find_candidates: ranked");
        candidates
    }

    /// The single best candidate, if any
    pub fn best(&self, requirement: &Requirement) -> Option<Candidate> {
        self.find_candidates(requirement).into_iter().next()
    }

    /// Fold an observed outcome into a capability's metrics
    ///
    /// Success rate and latency move by an exponential moving average; load
    /// is a gauge and is replaced outright.
    pub fn update_metrics(
        &self,
        worker_id: &str,
        capability_name: &str,
        update: MetricsUpdate,
    ) -> Result<WorkerCapability, CatalogError> {
        debug!(%worker_id, %capability_name, ?update, "CapabilityCatalog::update_metrics: called");
        let alpha = self.config.smoothing_factor;
        let mut entries = self.write();
        let caps = entries
            .get_mut(worker_id)
            .ok_or_else(|| CatalogError::UnknownWorker(worker_id.to_string()))?;
        let cap = caps
            .get_mut(capability_name)
            .ok_or_else(|| CatalogError::UnknownCapability(capability_name.to_string()))?;

        let observed = if update.success { 1.0 } else { 0.0 };
        cap.success_rate = ema(cap.success_rate, observed, alpha);
        if let Some(latency) = update.latency_ms
            && latency.is_finite()
            && latency >= 0.0
        {
            cap.estimated_latency_ms = ema(cap.estimated_latency_ms, latency, alpha);
        }
        if let Some(load) = update.load {
            cap.current_load = load;
        }
        cap.normalize();
        Ok(cap.clone())
    }

    /// Set the load gauge on every capability of `worker_id`
    pub fn set_load(&self, worker_id: &str, load: f64) -> Result<(), CatalogError> {
        let mut entries = self.write();
        let caps = entries
            .get_mut(worker_id)
            .ok_or_else(|| CatalogError::UnknownWorker(worker_id.to_string()))?;
        for cap in caps.values_mut() {
            cap.current_load = load;
            cap.normalize();
        }
        Ok(())
    }

    /// Capability names `name` needs, in execution order, ending with `name`
    pub fn resolve_dependencies(&self, name: &str) -> Result<Vec<String>, CatalogError> {
        debug!(%name, "CapabilityCatalog::resolve_dependencies: called");
        let graph = self.dependency_graph();
        if !graph.contains_key(name) {
            return Err(CatalogError::UnknownCapability(name.to_string()));
        }
        if let Some(cycle) = deps::find_cycle(&graph) {
            warn!(?cycle, "CapabilityCatalog: dependency cycle");
            return Err(CatalogError::DependencyCycle(cycle));
        }

        let order = deps::closure(name, &graph);
        if let Some(missing) = order.iter().find(|n| !graph.contains_key(n.as_str())) {
            return Err(CatalogError::UnknownCapability(missing.clone()));
        }
        Ok(order)
    }

    fn dependency_graph(&self) -> DepGraph {
        let mut graph = DepGraph::new();
        for cap in self.read().values().flat_map(|caps| caps.values()) {
            graph
                .entry(cap.capability_name.clone())
                .or_default()
                .extend(cap.dependencies.iter().cloned());
        }
        graph
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::new(CatalogConfig::default())
    }
}

fn ema(previous: f64, observed: f64, alpha: f64) -> f64 {
    alpha * observed + (1.0 - alpha) * previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SecurityLevel;

    fn catalog() -> CapabilityCatalog {
        CapabilityCatalog::default()
    }

    #[test]
    fn test_register_rejects_empty_names() {
        let catalog = catalog();
        assert!(matches!(
            catalog.register(WorkerCapability::new("", "x")),
            Err(CatalogError::Invalid(_))
        ));
        assert!(matches!(
            catalog.register(WorkerCapability::new("w", " ")),
            Err(CatalogError::Invalid(_))
        ));
    }

    #[test]
    fn test_find_candidates_exact_match_only() {
        let catalog = catalog();
        catalog.register(WorkerCapability::new("w1", "transfer")).unwrap();
        catalog.register(WorkerCapability::new("w2", "balance")).unwrap();

        let candidates = catalog.find_candidates(&Requirement::new("transfer"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].worker_id, "w1");
    }

    #[test]
    fn test_find_candidates_unknown_capability_is_empty() {
        let catalog = catalog();
        catalog.register(WorkerCapability::new("w1", "transfer")).unwrap();
        assert!(catalog.find_candidates(&Requirement::new("swap")).is_empty());
        assert!(catalog.best(&Requirement::new("swap")).is_none());
    }

    #[test]
    fn test_any_capability_applies_min_score() {
        let catalog = catalog();
        catalog.register(WorkerCapability::new("w1", "transfer")).unwrap();
        // Worst possible non-matching capability: 0.2*0.3 + 0 + 0 + 0 = 0.06
        catalog
            .register(
                WorkerCapability::new("w2", "balance")
                    .with_success_rate(0.0)
                    .with_load(1.0)
                    .with_cost(1.0),
            )
            .unwrap();

        let req = Requirement::new("transfer")
            .with_min_security(SecurityLevel::High)
            .any_capability();
        let candidates = catalog.find_candidates(&req);
        let workers: Vec<_> = candidates.iter().map(|c| c.worker_id.as_str()).collect();
        assert_eq!(workers, vec!["w1"]);
    }

    #[test]
    fn test_candidates_sorted_by_score_then_load() {
        let catalog = catalog();
        catalog
            .register(WorkerCapability::new("reliable", "transfer").with_success_rate(1.0))
            .unwrap();
        catalog
            .register(WorkerCapability::new("flaky", "transfer").with_success_rate(0.2))
            .unwrap();

        let order: Vec<_> = catalog
            .find_candidates(&Requirement::new("transfer"))
            .into_iter()
            .map(|c| c.worker_id)
            .collect();
        assert_eq!(order, vec!["reliable", "flaky"]);
    }

    #[test]
    fn test_unmet_dependency_is_ineligible() {
        let catalog = catalog();
        catalog
            .register(WorkerCapability::new("w1", "swap").with_dependencies(["quote"]))
            .unwrap();
        assert!(catalog.find_candidates(&Requirement::new("swap")).is_empty());

        catalog.register(WorkerCapability::new("w2", "quote")).unwrap();
        assert_eq!(catalog.find_candidates(&Requirement::new("swap")).len(), 1);
    }

    #[test]
    fn test_update_metrics_applies_ema_and_sets_load() {
        let catalog = catalog();
        catalog
            .register(
                WorkerCapability::new("w1", "transfer")
                    .with_success_rate(1.0)
                    .with_latency_ms(1000.0),
            )
            .unwrap();

        let cap = catalog
            .update_metrics("w1", "transfer", MetricsUpdate::failure(2000.0).with_load(0.7))
            .unwrap();
        assert!((cap.success_rate - 0.9).abs() < 1e-9);
        assert!((cap.estimated_latency_ms - 1100.0).abs() < 1e-9);
        assert!((cap.current_load - 0.7).abs() < 1e-9);

        let cap = catalog
            .update_metrics("w1", "transfer", MetricsUpdate::success(1100.0))
            .unwrap();
        assert!((cap.success_rate - 0.91).abs() < 1e-9);
        assert!((cap.current_load - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_update_metrics_unknown_targets() {
        let catalog = catalog();
        catalog.register(WorkerCapability::new("w1", "transfer")).unwrap();
        assert_eq!(
            catalog.update_metrics("ghost", "transfer", MetricsUpdate::default()),
            Err(CatalogError::UnknownWorker("ghost".into()))
        );
        assert_eq!(
            catalog.update_metrics("w1", "swap", MetricsUpdate::default()),
            Err(CatalogError::UnknownCapability("swap".into()))
        );
    }

    #[test]
    fn test_remove_worker() {
        let catalog = catalog();
        catalog.register(WorkerCapability::new("w1", "a")).unwrap();
        catalog.register(WorkerCapability::new("w1", "b")).unwrap();
        catalog.register(WorkerCapability::new("w2", "a")).unwrap();

        assert_eq!(catalog.remove_worker("w1"), 2);
        assert_eq!(catalog.remove_worker("w1"), 0);
        assert!(catalog.capabilities_for("w1").is_empty());
        assert_eq!(catalog.snapshot().len(), 1);
        assert_eq!(catalog.worker_count(), 1);
    }

    #[test]
    fn test_set_load_affects_ranking() {
        let catalog = catalog();
        catalog.register(WorkerCapability::new("a", "transfer")).unwrap();
        catalog.register(WorkerCapability::new("b", "transfer")).unwrap();
        catalog.set_load("a", 0.9).unwrap();

        let best = catalog.best(&Requirement::new("transfer")).unwrap();
        assert_eq!(best.worker_id, "b");
        assert!(catalog.set_load("ghost", 0.1).is_err());
    }

    #[test]
    fn test_resolve_dependencies_in_execution_order() {
        let catalog = catalog();
        catalog.register(WorkerCapability::new("w1", "balance")).unwrap();
        catalog
            .register(WorkerCapability::new("w2", "quote").with_dependencies(["balance"]))
            .unwrap();
        catalog
            .register(WorkerCapability::new("w3", "swap").with_dependencies(["quote", "balance"]))
            .unwrap();

        assert_eq!(
            catalog.resolve_dependencies("swap").unwrap(),
            vec!["balance", "quote", "swap"]
        );
    }

    #[test]
    fn test_resolve_dependencies_errors() {
        let catalog = catalog();
        catalog
            .register(WorkerCapability::new("w1", "swap").with_dependencies(["quote"]))
            .unwrap();
        assert_eq!(
            catalog.resolve_dependencies("swap"),
            Err(CatalogError::UnknownCapability("quote".into()))
        );
        assert_eq!(
            catalog.resolve_dependencies("nothing"),
            Err(CatalogError::UnknownCapability("nothing".into()))
        );

        catalog
            .register(WorkerCapability::new("w2", "quote").with_dependencies(["swap"]))
            .unwrap();
        assert!(matches!(
            catalog.resolve_dependencies("swap"),
            Err(CatalogError::DependencyCycle(_))
        ));
    }
}
