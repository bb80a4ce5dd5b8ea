//! Token-bucket policy model.
//!
//! A [`Policy`] is an immutable description of one bucket enforced by the
//! upstream API. The syncer derives one from each contract entry the
//! upstream reports; workers only ever see a policy's `id`, via the
//! `types`/`refills` metadata maps the syncer writes to the repository.

use serde::{Deserialize, Serialize};

/// Which of the two countable resources a policy governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyType {
    /// Processing units: decremented by the request's computed PU cost.
    #[serde(rename = "PU")]
    ProcessingUnits,
    /// Requests: decremented by exactly 1 per request.
    #[serde(rename = "RQ")]
    Requests,
}

impl PolicyType {
    /// Short tag used in a policy's `id` and in the repository's `types` map.
    pub fn short_name(self) -> &'static str {
        match self {
            PolicyType::ProcessingUnits => "PU",
            PolicyType::Requests => "RQ",
        }
    }

    /// The upstream's long-form name, as used in contract/statistics JSON.
    pub fn upstream_name(self) -> &'static str {
        match self {
            PolicyType::ProcessingUnits => "PROCESSING_UNITS",
            PolicyType::Requests => "REQUESTS",
        }
    }

    pub fn from_upstream_name(name: &str) -> Option<Self> {
        match name {
            "PROCESSING_UNITS" => Some(PolicyType::ProcessingUnits),
            "REQUESTS" => Some(PolicyType::Requests),
            _ => None,
        }
    }
}

/// Output format of a processing request, as relevant to the PU cost
/// calculator (§4.5). Any format not named by the upstream's two special
/// cases charges no multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Tiff32,
    OctetStream,
    Other,
}

/// One token-bucket rate-limiting rule, as reported by the upstream's
/// rate-limit contract endpoint.
///
/// Invariants (spec.md §3): `id` is unique across the policy set derived
/// from a single contract fetch; `fill_quantity / fill_interval_s` equals
/// `1e9 / nanos_between_refills` within floating-point rounding;
/// `fill_interval_s >= 0.1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// `{type}_{capacity}_{sampling_period}`, e.g. `PU_300000_60`.
    pub id: String,
    pub policy_type: PolicyType,
    pub capacity: u64,
    pub nanos_between_refills: u64,
    /// The upstream's current remaining-token count at policy-load time,
    /// used to seed the repository's counter on `init_rate_limits`.
    pub initial: f64,
    pub fill_interval_s: f64,
    pub fill_quantity: u64,
    /// Echoed verbatim from the upstream contract so statistics lookups
    /// can key back into the right `samplingPeriod` bucket.
    pub sampling_period: u64,
}

impl Policy {
    pub fn new(
        policy_type: PolicyType,
        capacity: u64,
        sampling_period: u64,
        nanos_between_refills: u64,
        initial: f64,
    ) -> Self {
        let id = format!(
            "{}_{}_{}",
            policy_type.short_name(),
            capacity,
            sampling_period
        );
        let (fill_interval_s, fill_quantity) = adjust_filling(nanos_between_refills);
        Self {
            id,
            policy_type,
            capacity,
            nanos_between_refills,
            initial,
            fill_interval_s,
            fill_quantity,
            sampling_period,
        }
    }
}

/// Lower bound on scheduling precision: we don't get to run tasks with
/// nanosecond accuracy, so refills below this cadence are batched.
const MIN_INTERVAL_NS: u64 = 100_000_000; // 100ms

/// Derive a realistic refill cadence from the upstream's per-token rate.
///
/// If a token arrives no faster than every 100ms, refill one token per
/// `nanos_between_refills` seconds. Otherwise batch `n` tokens into a
/// single refill every `n * nanos_between_refills` seconds, where `n` is
/// the smallest integer that pushes the interval back up to 100ms. The
/// resulting rate (`fill_quantity / fill_interval_s`) is exactly the
/// upstream's declared rate; only the granularity at which it's applied
/// changes.
pub fn adjust_filling(nanos_between_refills: u64) -> (f64, u64) {
    if nanos_between_refills >= MIN_INTERVAL_NS {
        return (nanos_between_refills as f64 / 1_000_000_000.0, 1);
    }
    let n = MIN_INTERVAL_NS.div_ceil(nanos_between_refills);
    let fill_interval_s = (nanos_between_refills * n) as f64 / 1_000_000_000.0;
    (fill_interval_s, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_filling_batches_sub_100ms_rates() {
        let (interval, quantity) = adjust_filling(60_000_000);
        assert_eq!(quantity, 2);
        assert!((interval - 0.12).abs() < 1e-9);
    }

    #[test]
    fn adjust_filling_passes_through_slow_rates() {
        let (interval, quantity) = adjust_filling(1_000_000_000);
        assert_eq!(quantity, 1);
        assert!((interval - 1.0).abs() < 1e-9);
    }

    #[test]
    fn adjust_filling_respects_hundred_ms_floor() {
        let (interval, _) = adjust_filling(100_000_000);
        assert!(interval >= 0.1);
    }

    #[test]
    fn policy_id_is_derived_from_type_capacity_and_sampling_period() {
        let p = Policy::new(PolicyType::ProcessingUnits, 300_000, 60, 200_000_000, 300_000.0);
        assert_eq!(p.id, "PU_300000_60");
    }
}
