//! The shared-state contract both the syncer and every worker depend on
//! (spec.md §4.1). Two backends satisfy it: [`redis_backend::RedisRepository`]
//! and [`etcd_backend::EtcdRepository`] — interchangeable from the caller's
//! point of view, since all higher-level behaviour (the refill step, the
//! admission algorithm) is specified purely in terms of `increment_counter`
//! and the liveness contract.

pub mod etcd_backend;
pub mod redis_backend;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::policy::{Policy, PolicyType};

pub use etcd_backend::EtcdRepository;
pub use redis_backend::RedisRepository;

/// Shared counter store, abstracted over the backend.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Clear any previous `remaining`/`refill_ns`/`types` state, seed each
    /// policy's counter from its observed `initial` value, write metadata,
    /// and set the liveness marker. Must appear atomic to later readers.
    async fn init_rate_limits(&self, policies: &[Policy], liveness_ttl_ms: u64) -> Result<()>;

    /// Atomic fetch-and-add; `amount` may be negative. Returns the
    /// post-increment value. The only mutator of bucket state after init.
    async fn increment_counter(&self, policy_id: &str, amount: f64) -> Result<f64>;

    /// Snapshot of the `types` metadata map.
    async fn get_policy_types(&self) -> Result<HashMap<String, PolicyType>>;

    /// Snapshot of the `refill_ns` metadata map.
    async fn get_policy_refills(&self) -> Result<HashMap<String, u64>>;

    /// Snapshot of all counters. Not required to be coherent across keys.
    async fn get_buckets_state(&self) -> Result<HashMap<String, f64>>;

    /// Reset the liveness marker with a fresh TTL.
    async fn signal_syncer_alive(&self, ttl_ms: u64) -> Result<()>;

    /// True iff the liveness marker currently exists / has not expired.
    async fn is_syncer_alive(&self) -> Result<bool>;
}
