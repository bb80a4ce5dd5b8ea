//! Worker admission algorithm (spec.md §4.4).
//!
//! No coordinator round-trip beyond the repository itself: every worker
//! decrements every policy's counter unconditionally and derives its own
//! wait from however negative the result came back. Two concurrent
//! workers that both go negative get different waits — the later one
//! waits longer — purely from the total order of atomic fetch-and-adds.

use thiserror::Error;

use crate::error::RlguardError;
use crate::policy::PolicyType;
use crate::repository::Repository;

#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The liveness marker is absent or expired; the caller should fall
    /// back to reactive (exponential) backoff against upstream 429s.
    #[error("coordinator liveness marker is absent or expired")]
    SyncerDown,

    #[error(transparent)]
    Repository(#[from] RlguardError),
}

/// Attempt admission for a request costing `pu` processing units.
///
/// Returns the number of seconds the caller must sleep before issuing the
/// actual upstream request (`0.0` means go now).
pub async fn apply_for_request(repo: &dyn Repository, pu: f64) -> Result<f64, AdmissionError> {
    if !repo.is_syncer_alive().await? {
        return Err(AdmissionError::SyncerDown);
    }

    let types = repo.get_policy_types().await?;
    let refills = repo.get_policy_refills().await?;

    let mut max_wait_ns = 0.0_f64;
    for (policy_id, policy_type) in &types {
        let decrement = match policy_type {
            PolicyType::ProcessingUnits => pu,
            PolicyType::Requests => 1.0,
        };
        let new_remaining = repo.increment_counter(policy_id, -decrement).await?;

        if new_remaining < 0.0 {
            let Some(&refill_ns) = refills.get(policy_id) else {
                continue;
            };
            let wait_ns = -new_remaining * refill_ns as f64;
            if wait_ns > max_wait_ns {
                max_wait_ns = wait_ns;
            }
        }
    }

    Ok((max_wait_ns / 1_000_000_000.0).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::Result;
    use crate::policy::Policy;

    struct FakeRepository {
        alive: bool,
        types: HashMap<String, PolicyType>,
        refills: HashMap<String, u64>,
        counters: Mutex<HashMap<String, f64>>,
    }

    impl FakeRepository {
        fn from_policies(policies: &[Policy]) -> Self {
            Self {
                alive: true,
                types: policies
                    .iter()
                    .map(|p| (p.id.clone(), p.policy_type))
                    .collect(),
                refills: policies
                    .iter()
                    .map(|p| (p.id.clone(), p.nanos_between_refills))
                    .collect(),
                counters: Mutex::new(
                    policies.iter().map(|p| (p.id.clone(), p.initial)).collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl Repository for FakeRepository {
        async fn init_rate_limits(&self, _policies: &[Policy], _liveness_ttl_ms: u64) -> Result<()> {
            Ok(())
        }

        async fn increment_counter(&self, policy_id: &str, amount: f64) -> Result<f64> {
            let mut counters = self.counters.lock().unwrap();
            let entry = counters.entry(policy_id.to_string()).or_insert(0.0);
            *entry += amount;
            Ok(*entry)
        }

        async fn get_policy_types(&self) -> Result<HashMap<String, PolicyType>> {
            Ok(self.types.clone())
        }

        async fn get_policy_refills(&self) -> Result<HashMap<String, u64>> {
            Ok(self.refills.clone())
        }

        async fn get_buckets_state(&self) -> Result<HashMap<String, f64>> {
            Ok(self.counters.lock().unwrap().clone())
        }

        async fn signal_syncer_alive(&self, _ttl_ms: u64) -> Result<()> {
            Ok(())
        }

        async fn is_syncer_alive(&self) -> Result<bool> {
            Ok(self.alive)
        }
    }

    #[tokio::test]
    async fn ample_capacity_returns_zero_wait() {
        let policies = vec![Policy::new(
            PolicyType::ProcessingUnits,
            1000,
            100,
            100_000_000,
            1000.0,
        )];
        let repo = FakeRepository::from_policies(&policies);
        let wait = apply_for_request(&repo, 2.0).await.unwrap();
        assert_eq!(wait, 0.0);
    }

    #[tokio::test]
    async fn exhausted_bucket_returns_positive_wait() {
        // capacity 2, refills 1 token per 1e9 ns (1 token/s).
        let policies = vec![Policy::new(PolicyType::ProcessingUnits, 2, 1, 1_000_000_000, 2.0)];
        let repo = FakeRepository::from_policies(&policies);

        let first = apply_for_request(&repo, 2.0).await.unwrap();
        assert_eq!(first, 0.0);

        let second = apply_for_request(&repo, 2.0).await.unwrap();
        assert!(second >= 1.0, "expected >= 1s wait, got {second}");
    }

    #[tokio::test]
    async fn dead_syncer_raises_syncer_down() {
        let mut repo = FakeRepository::from_policies(&[]);
        repo.alive = false;
        let err = apply_for_request(&repo, 1.0).await.unwrap_err();
        assert!(matches!(err, AdmissionError::SyncerDown));
    }

    #[tokio::test]
    async fn strictest_policy_dominates_the_wait() {
        let policies = vec![
            Policy::new(PolicyType::Requests, 1, 1, 1_000_000_000, 1.0),
            Policy::new(PolicyType::ProcessingUnits, 1000, 100, 100_000_000, 1000.0),
        ];
        let repo = FakeRepository::from_policies(&policies);

        let first = apply_for_request(&repo, 2.0).await.unwrap();
        assert_eq!(first, 0.0);

        let second = apply_for_request(&repo, 2.0).await.unwrap();
        assert!(second >= 1.0, "RQ bucket should dominate, got {second}");
    }
}
