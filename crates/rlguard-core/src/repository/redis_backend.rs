//! Networked hash-store backend (spec.md §4.1, §6): Redis, using
//! `HINCRBYFLOAT` on hash fields for atomic counter mutation and a
//! string key with a millisecond `PX` TTL for liveness.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::Result;
use crate::policy::{Policy, PolicyType};

use super::Repository;

const KEY_REMAINING: &str = "remaining";
const KEY_REFILL_NS: &str = "refill_ns";
const KEY_TYPES: &str = "types";
const KEY_SYNCER_ALIVE: &str = "syncer_alive";

pub struct RedisRepository {
    conn: ConnectionManager,
}

impl RedisRepository {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{host}:{port}"))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Repository for RedisRepository {
    async fn init_rate_limits(&self, policies: &[Policy], liveness_ttl_ms: u64) -> Result<()> {
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(KEY_REMAINING)
            .ignore()
            .del(KEY_REFILL_NS)
            .ignore()
            .del(KEY_TYPES)
            .ignore();

        if !policies.is_empty() {
            let remaining: Vec<(&str, f64)> = policies
                .iter()
                .map(|p| (p.id.as_str(), p.initial))
                .collect();
            let refills: Vec<(&str, u64)> = policies
                .iter()
                .map(|p| (p.id.as_str(), p.nanos_between_refills))
                .collect();
            let types: Vec<(&str, &str)> = policies
                .iter()
                .map(|p| (p.id.as_str(), p.policy_type.short_name()))
                .collect();

            pipe.hset_multiple(KEY_REMAINING, &remaining)
                .ignore()
                .hset_multiple(KEY_REFILL_NS, &refills)
                .ignore()
                .hset_multiple(KEY_TYPES, &types)
                .ignore();
        }

        pipe.query_async::<_, ()>(&mut conn).await?;

        self.signal_syncer_alive(liveness_ttl_ms).await
    }

    async fn increment_counter(&self, policy_id: &str, amount: f64) -> Result<f64> {
        let mut conn = self.conn.clone();
        let new_value: f64 = redis::cmd("HINCRBYFLOAT")
            .arg(KEY_REMAINING)
            .arg(policy_id)
            .arg(amount)
            .query_async(&mut conn)
            .await?;
        Ok(new_value)
    }

    async fn get_policy_types(&self) -> Result<HashMap<String, PolicyType>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(KEY_TYPES).await?;
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
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(KEY_REFILL_NS).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(id, ns)| ns.parse().ok().map(|ns| (id, ns)))
            .collect())
    }

    async fn get_buckets_state(&self) -> Result<HashMap<String, f64>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(KEY_REMAINING).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(id, v)| v.parse().ok().map(|v| (id, v)))
            .collect())
    }

    async fn signal_syncer_alive(&self, ttl_ms: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        // `PX` (millisecond TTL) isn't exposed by the high-level `set_ex`
        // helper (which only takes whole seconds), so issue it directly.
        let _: () = redis::cmd("SET")
            .arg(KEY_SYNCER_ALIVE)
            .arg(1)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_syncer_alive(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(KEY_SYNCER_ALIVE).await?;
        Ok(exists)
    }
}
