//! Coordination-service backend (spec.md §4.1, §9): etcd, standing in for
//! the original ZooKeeper-counter design (see DESIGN.md for the
//! substitution rationale). Per-policy counters live under
//! `<base>/remaining/<id>` as durable nodes; metadata is a pair of JSON
//! blobs; liveness has no native TTL, so it's encoded as an absolute
//! millisecond expiry timestamp compared against wall time on read.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, DeleteOptions, GetOptions, Txn, TxnOp};

use crate::error::{Result, RlguardError};
use crate::policy::{Policy, PolicyType};

use super::Repository;

const MAX_CAS_ATTEMPTS: u32 = 20;

pub struct EtcdRepository {
    client: Client,
    base: String,
}

impl EtcdRepository {
    pub async fn connect(endpoints: &[String], base: impl Into<String>) -> Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self {
            client,
            base: base.into(),
        })
    }

    fn remaining_key(&self, policy_id: &str) -> String {
        format!("{}/remaining/{}", self.base, policy_id)
    }

    fn remaining_prefix(&self) -> String {
        format!("{}/remaining/", self.base)
    }

    fn refill_ns_key(&self) -> String {
        format!("{}/refill_ns", self.base)
    }

    fn types_key(&self) -> String {
        format!("{}/types", self.base)
    }

    fn syncer_alive_key(&self) -> String {
        format!("{}/syncer_alive", self.base)
    }

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }
}

#[async_trait]
impl Repository for EtcdRepository {
    async fn init_rate_limits(&self, policies: &[Policy], liveness_ttl_ms: u64) -> Result<()> {
        let mut kv = self.client.kv_client();

        kv.delete(
            self.remaining_prefix(),
            Some(DeleteOptions::new().with_prefix()),
        )
        .await?;

        for policy in policies {
            kv.put(self.remaining_key(&policy.id), policy.initial.to_string(), None)
                .await?;
        }

        let refills: HashMap<&str, u64> = policies
            .iter()
            .map(|p| (p.id.as_str(), p.nanos_between_refills))
            .collect();
        let types: HashMap<&str, &str> = policies
            .iter()
            .map(|p| (p.id.as_str(), p.policy_type.short_name()))
            .collect();

        kv.put(self.refill_ns_key(), serde_json::to_vec(&refills)?, None)
            .await?;
        kv.put(self.types_key(), serde_json::to_vec(&types)?, None)
            .await?;

        self.signal_syncer_alive(liveness_ttl_ms).await
    }

    async fn increment_counter(&self, policy_id: &str, amount: f64) -> Result<f64> {
        let mut kv = self.client.kv_client();
        let key = self.remaining_key(policy_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let resp = kv.get(key.as_str(), None).await?;
            let (current, mod_revision) = match resp.kvs().first() {
                Some(entry) => {
                    let value: f64 = std::str::from_utf8(entry.value())
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| RlguardError::EtcdNodeMissing(key.clone()))?;
                    (value, entry.mod_revision())
                }
                None => (0.0, 0),
            };
            let new_value = current + amount;

            let txn = Txn::new()
                .when(vec![Compare::mod_revision(
                    key.as_str(),
                    CompareOp::Equal,
                    mod_revision,
                )])
                .and_then(vec![TxnOp::put(key.as_str(), new_value.to_string(), None)])
                .or_else(vec![TxnOp::get(key.as_str(), None)]);

            let resp = kv.txn(txn).await?;
            if resp.succeeded() {
                return Ok(new_value);
            }
        }

        Err(RlguardError::Config(format!(
            "increment_counter: exhausted compare-and-swap retries for {policy_id}"
        )))
    }

    async fn get_policy_types(&self) -> Result<HashMap<String, PolicyType>> {
        let mut kv = self.client.kv_client();
        let resp = kv.get(self.types_key(), None).await?;
        let bytes = resp
            .kvs()
            .first()
            .ok_or_else(|| RlguardError::EtcdNodeMissing(self.types_key()))?
            .value();
        let raw: HashMap<String, String> = serde_json::from_slice(bytes)?;
        Ok(raw
            .into_iter()
            .filter_map(|(id, ty)| match ty.as_str() {
                "PU" => Some((id, PolicyType::ProcessingUnits)),
                "RQ" => Some((id, PolicyType::Requests)),
                _ => None,
            })
            .collect())
    }

    async fn get_policy_refills(&self) -> Result<HashMap<String, u64>> {
        let mut kv = self.client.kv_client();
        let resp = kv.get(self.refill_ns_key(), None).await?;
        let bytes = resp
            .kvs()
            .first()
            .ok_or_else(|| RlguardError::EtcdNodeMissing(self.refill_ns_key()))?
            .value();
        Ok(serde_json::from_slice(bytes)?)
    }

    async fn get_buckets_state(&self) -> Result<HashMap<String, f64>> {
        let mut kv = self.client.kv_client();
        let resp = kv
            .get(
                self.remaining_prefix(),
                Some(GetOptions::new().with_prefix()),
            )
            .await?;
        let prefix = self.remaining_prefix();
        let mut out = HashMap::new();
        for entry in resp.kvs() {
            let key = entry.key_str().unwrap_or_default();
            let Some(id) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(value) = std::str::from_utf8(entry.value())
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
            {
                out.insert(id.to_string(), value);
            }
        }
        Ok(out)
    }

    async fn signal_syncer_alive(&self, ttl_ms: u64) -> Result<()> {
        let mut kv = self.client.kv_client();
        let expiry = Self::now_ms() + ttl_ms as i64;
        kv.put(self.syncer_alive_key(), expiry.to_string(), None)
            .await?;
        Ok(())
    }

    async fn is_syncer_alive(&self) -> Result<bool> {
        let mut kv = self.client.kv_client();
        let resp = kv.get(self.syncer_alive_key(), None).await?;
        let Some(entry) = resp.kvs().first() else {
            return Ok(false);
        };
        let expiry: i64 = match std::str::from_utf8(entry.value()).ok().and_then(|s| s.parse().ok()) {
            Some(v) => v,
            None => return Ok(false),
        };
        Ok(Self::now_ms() < expiry)
    }
}
