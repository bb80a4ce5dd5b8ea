//! Cooperative timer scheduler (spec.md §4.3).
//!
//! A single-threaded priority queue of refill and statistics-refresh
//! tasks. There is no parallelism and no locking here: tasks run strictly
//! one at a time, and each reschedules itself relative to its own nominal
//! target time (not to when it actually fired), so a slow repository
//! round-trip doesn't let the nominal cadence slip.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use rlguard_core::jwt;
use rlguard_core::policy::Policy;
use rlguard_core::repository::Repository;
use rlguard_core::upstream::UpstreamClient;
use rlguard_core::Result;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_EXP_MARGIN_S, MIN_RESCHEDULE_DELAY};

/// Refill tasks run before the statistics refresh when both are due at
/// the same instant (spec.md §4.3: "must never starve refill").
const FILL_PRIORITY: u8 = 1;
const REFRESH_PRIORITY: u8 = 2;

enum TaskKind {
    Refill(usize),
    RefreshBuckets,
}

struct ScheduledTask {
    fire_at: Instant,
    priority: u8,
    /// The time this task was nominally due, used to compute the next
    /// occurrence without accumulating drift from how late this one ran.
    nominal_at: Instant,
    kind: TaskKind,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.priority == other.priority
    }
}
impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    /// `BinaryHeap` is a max-heap; reverse on `fire_at` so the earliest
    /// task pops first, and break ties in favour of the lower priority
    /// number (refill over refresh).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.priority.cmp(&self.priority))
    }
}

/// Derive the liveness TTL from `REVISIT_TIME_MSEC`, or, absent that,
/// `2 * min(fill_interval_s)` across all policies (spec.md §4.3).
pub fn derive_liveness_ttl_ms(policies: &[Policy], revisit_override: Option<StdDuration>) -> u64 {
    if let Some(d) = revisit_override {
        return d.as_millis() as u64;
    }
    let min_interval_s = policies
        .iter()
        .map(|p| p.fill_interval_s)
        .fold(f64::INFINITY, f64::min);
    if !min_interval_s.is_finite() {
        return 0;
    }
    (2.0 * 1000.0 * min_interval_s) as u64
}

fn now_epoch_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Apply `incr_by` to `policy_id`'s counter, then clamp back down to
/// `capacity` if the result overshot (spec.md §4.3 fill step). The clamp
/// is a second, non-atomic `increment_counter` call: the worst case is a
/// transient over-capacity reading bounded by one `incr_by`, which is
/// acceptable because both this and every worker decrement are
/// themselves atomic fetch-and-adds.
async fn apply_clamped_increment(
    repo: &dyn Repository,
    policy_id: &str,
    incr_by: f64,
    capacity: u64,
) -> Result<f64> {
    let new_value = repo.increment_counter(policy_id, incr_by).await?;
    if new_value.floor() as i64 > capacity as i64 {
        let overflow = new_value.floor() as i64 - capacity as i64;
        return repo.increment_counter(policy_id, -(overflow as f64)).await;
    }
    Ok(new_value)
}

async fn fill_step(repo: &dyn Repository, policy: &Policy, liveness_ttl_ms: u64) -> Result<()> {
    let final_value =
        apply_clamped_increment(repo, &policy.id, policy.fill_quantity as f64, policy.capacity)
            .await?;
    debug!(
        policy_id = %policy.id,
        final_value,
        capacity = policy.capacity,
        "filled"
    );
    repo.signal_syncer_alive(liveness_ttl_ms).await
}

/// Re-sync a bucket from the upstream's own remaining-token count,
/// correcting cumulative drift and accounting for requests the upstream
/// counted that our fleet didn't make, or vice versa (spec.md §4.3).
#[allow(clippy::too_many_arguments)]
async fn refresh_buckets(
    repo: &dyn Repository,
    upstream: &UpstreamClient,
    client_id: &str,
    client_secret: &str,
    policies: &[Policy],
    liveness_ttl_ms: u64,
    auth_token: &mut String,
) -> Result<()> {
    if jwt::will_soon_expire(auth_token.as_str(), now_epoch_s(), DEFAULT_EXP_MARGIN_S)? {
        *auth_token = upstream
            .request_auth_token(client_id, client_secret)
            .await?;
    }
    let user_id = jwt::extract_user_id(auth_token.as_str())?;
    let stats = upstream
        .fetch_current_stats(auth_token.as_str(), &user_id)
        .await?;
    let current = repo.get_buckets_state().await?;

    for policy in policies {
        let Some(by_period) = stats.get(policy.policy_type.upstream_name()) else {
            continue;
        };
        let Some(&upstream_remaining) = by_period.get(&policy.sampling_period.to_string()) else {
            continue;
        };
        let ours = current.get(&policy.id).copied().unwrap_or(0.0);
        let incr_by = upstream_remaining - ours;
        debug!(
            policy_id = %policy.id,
            ours,
            upstream_remaining,
            incr_by,
            "refreshing bucket from upstream statistics"
        );
        apply_clamped_increment(repo, &policy.id, incr_by, policy.capacity).await?;
    }
    repo.signal_syncer_alive(liveness_ttl_ms).await
}

/// Drive the refill/refresh priority queue forever. Repository and
/// upstream failures are logged and swallowed (spec.md §7): the next
/// scheduled tick re-attempts the same logical update, so transient
/// errors self-heal without unwinding the scheduler.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    repo: &dyn Repository,
    upstream: &UpstreamClient,
    client_id: &str,
    client_secret: &str,
    policies: &[Policy],
    liveness_ttl_ms: u64,
    refresh_interval: Option<StdDuration>,
    mut auth_token: String,
) {
    let start = Instant::now();
    let mut heap = BinaryHeap::new();

    for (idx, policy) in policies.iter().enumerate() {
        info!(
            policy_id = %policy.id,
            fill_quantity = policy.fill_quantity,
            fill_interval_s = policy.fill_interval_s,
            capacity = policy.capacity,
            "rate limiting policy scheduled"
        );
        let nominal_at = start + Duration::from_secs_f64(policy.fill_interval_s);
        heap.push(ScheduledTask {
            fire_at: nominal_at,
            priority: FILL_PRIORITY,
            nominal_at,
            kind: TaskKind::Refill(idx),
        });
    }

    if let Some(interval) = refresh_interval {
        info!(seconds = interval.as_secs(), "refreshing buckets periodically");
        let nominal_at = start + interval;
        heap.push(ScheduledTask {
            fire_at: nominal_at,
            priority: REFRESH_PRIORITY,
            nominal_at,
            kind: TaskKind::RefreshBuckets,
        });
    }

    loop {
        let Some(task) = heap.pop() else {
            // No policies at all: nothing to schedule. Should not happen
            // in practice (a contract fetch always yields at least one
            // policy), but there is nothing useful to wait on here.
            return;
        };

        sleep_until(task.fire_at).await;
        let now = Instant::now();
        let late = now.saturating_duration_since(task.nominal_at);

        match task.kind {
            TaskKind::Refill(idx) => {
                let policy = &policies[idx];
                debug!(policy_id = %policy.id, late_ms = late.as_millis(), "filling");
                if let Err(err) = fill_step(repo, policy, liveness_ttl_ms).await {
                    warn!(policy_id = %policy.id, error = %err, "repository fill failed, will retry next tick");
                }
                let next_nominal = task.nominal_at + Duration::from_secs_f64(policy.fill_interval_s);
                let next_fire = next_nominal.max(now + MIN_RESCHEDULE_DELAY);
                heap.push(ScheduledTask {
                    fire_at: next_fire,
                    priority: FILL_PRIORITY,
                    nominal_at: next_nominal,
                    kind: TaskKind::Refill(idx),
                });
            }
            TaskKind::RefreshBuckets => {
                debug!(late_ms = late.as_millis(), "refreshing buckets");
                if let Err(err) = refresh_buckets(
                    repo,
                    upstream,
                    client_id,
                    client_secret,
                    policies,
                    liveness_ttl_ms,
                    &mut auth_token,
                )
                .await
                {
                    warn!(error = %err, "refreshing buckets failed");
                }
                let interval = refresh_interval.expect("refresh task only scheduled when set");
                let next_nominal = task.nominal_at + interval;
                let next_fire = next_nominal.max(now + MIN_RESCHEDULE_DELAY);
                heap.push(ScheduledTask {
                    fire_at: next_fire,
                    priority: REFRESH_PRIORITY,
                    nominal_at: next_nominal,
                    kind: TaskKind::RefreshBuckets,
                });
            }
        }
    }
}
