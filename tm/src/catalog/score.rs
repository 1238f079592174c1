//! Capability scoring

use std::cmp::Ordering;

use super::config::ScoreWeights;
use super::types::{Candidate, Requirement, WorkerCapability, unit};

/// Weighted fitness of `capability` for `requirement`
///
/// The result lies in `[0, weights.max_score()]`.
pub fn score(capability: &WorkerCapability, requirement: &Requirement, weights: &ScoreWeights) -> f64 {
    let mut total = 0.0;

    if capability.capability_name == requirement.capability {
        total += weights.name_match;
    }

    total += if capability.security_level >= requirement.min_security {
        weights.security
    } else {
        weights.security * weights.security_penalty
    };

    total += weights.success_rate * unit(capability.success_rate);
    total += weights.load * (1.0 - unit(capability.current_load));
    total += weights.cost * (1.0 - unit(capability.cost));

    if let Some(max_latency) = requirement.max_latency_ms
        && max_latency > 0.0
    {
        let latency = capability.estimated_latency_ms.max(0.0);
        total += weights.latency * (1.0 - latency / max_latency).max(0.0);
    }

    total
}

/// Order candidates best first: score descending, then lowest load, then worker id
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(compare);
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.capability.current_load.total_cmp(&b.capability.current_load))
        .then_with(|| a.worker_id.cmp(&b.worker_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SecurityLevel;
    use proptest::prelude::*;

    fn perfect(name: &str) -> WorkerCapability {
        WorkerCapability::new("w", name)
            .with_security(SecurityLevel::High)
            .with_success_rate(1.0)
            .with_load(0.0)
            .with_cost(0.0)
            .with_latency_ms(0.0)
    }

    fn candidate(worker: &str, score: f64, load: f64) -> Candidate {
        Candidate {
            worker_id: worker.to_string(),
            capability: WorkerCapability::new(worker, "c").with_load(load),
            score,
        }
    }

    #[test]
    fn test_perfect_match_scores_max() {
        let weights = ScoreWeights::default();
        let req = Requirement::new("transfer").with_max_latency_ms(1000.0);
        let s = score(&perfect("transfer"), &req, &weights);
        assert!((s - weights.max_score()).abs() < 1e-9);
    }

    #[test]
    fn test_latency_term_only_with_max_latency() {
        let weights = ScoreWeights::default();
        let cap = perfect("transfer");
        let without = score(&cap, &Requirement::new("transfer"), &weights);
        let with = score(&cap, &Requirement::new("transfer").with_max_latency_ms(500.0), &weights);
        assert!((with - without - weights.latency).abs() < 1e-9);
    }

    #[test]
    fn test_latency_over_budget_contributes_nothing() {
        let weights = ScoreWeights::default();
        let cap = perfect("transfer").with_latency_ms(5000.0);
        let base = score(&cap, &Requirement::new("transfer"), &weights);
        let capped = score(&cap, &Requirement::new("transfer").with_max_latency_ms(1000.0), &weights);
        assert!((base - capped).abs() < 1e-9);
    }

    #[test]
    fn test_security_below_minimum_is_penalised() {
        let weights = ScoreWeights::default();
        let req = Requirement::new("transfer").with_min_security(SecurityLevel::High);
        let high = score(&perfect("transfer"), &req, &weights);
        let low = score(&perfect("transfer").with_security(SecurityLevel::Low), &req, &weights);
        let expected_gap = weights.security * (1.0 - weights.security_penalty);
        assert!((high - low - expected_gap).abs() < 1e-9);
    }

    #[test]
    fn test_name_mismatch_loses_name_weight() {
        let weights = ScoreWeights::default();
        let req = Requirement::new("transfer");
        let hit = score(&perfect("transfer"), &req, &weights);
        let miss = score(&perfect("balance"), &req, &weights);
        assert!((hit - miss - weights.name_match).abs() < 1e-9);
    }

    #[test]
    fn test_busier_worker_scores_lower() {
        let weights = ScoreWeights::default();
        let req = Requirement::new("transfer");
        let idle = score(&perfect("transfer"), &req, &weights);
        let busy = score(&perfect("transfer").with_load(0.8), &req, &weights);
        assert!(idle > busy);
    }

    #[test]
    fn test_rank_breaks_ties_by_lowest_load() {
        let mut candidates = vec![
            candidate("busy", 0.8, 0.9),
            candidate("best", 0.9, 0.5),
            candidate("idle", 0.8, 0.1),
        ];
        rank(&mut candidates);
        let order: Vec<_> = candidates.iter().map(|c| c.worker_id.as_str()).collect();
        assert_eq!(order, vec!["best", "idle", "busy"]);
    }

    fn security_strategy() -> impl Strategy<Value = SecurityLevel> {
        prop_oneof![
            Just(SecurityLevel::Low),
            Just(SecurityLevel::Medium),
            Just(SecurityLevel::High),
        ]
    }

    proptest! {
        /// Property: a score never leaves [0, max_score] whatever the inputs
        #[test]
        fn score_is_bounded(
            success in -1.0f64..2.0,
            load in -1.0f64..2.0,
            cost in -1.0f64..2.0,
            latency in 0.0f64..10_000.0,
            max_latency in proptest::option::of(1.0f64..10_000.0),
            cap_level in security_strategy(),
            min_level in security_strategy(),
            same_name in any::<bool>(),
        ) {
            let weights = ScoreWeights::default();
            let cap = WorkerCapability::new("w", if same_name { "x" } else { "y" })
                .with_success_rate(success)
                .with_load(load)
                .with_cost(cost)
                .with_latency_ms(latency)
                .with_security(cap_level);
            let mut req = Requirement::new("x").with_min_security(min_level);
            req.max_latency_ms = max_latency;

            let s = score(&cap, &req, &weights);
            prop_assert!(s >= 0.0);
            prop_assert!(s <= weights.max_score() + 1e-9);
        }

        /// Property: ranking is ordered by score, descending
        #[test]
        fn rank_is_descending(scores in proptest::collection::vec((0.0f64..1.0, 0.0f64..1.0), 0..20)) {
            let mut candidates: Vec<_> = scores
                .iter()
                .enumerate()
                .map(|(i, (s, l))| candidate(&format!("w{}", i), *s, *l))
                .collect();
            rank(&mut candidates);
            for pair in candidates.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}
