//! Integration coverage for the syncer's backend-selection CLI and the
//! liveness-TTL derivation that feeds into `Repository::init_rate_limits`.

use std::time::Duration;

use clap::Parser;
use rlguard_core::policy::{Policy, PolicyType};
use rlguard_syncer::cli::Cli;
use rlguard_syncer::scheduler::derive_liveness_ttl_ms;

#[test]
fn zookeeper_positional_arg_selects_coordination_backend() {
    let cli = Cli::try_parse_from(["rlguard-syncer", "zookeeper"]).unwrap();
    assert!(cli.use_coordination_backend());
}

#[test]
fn no_positional_arg_selects_hash_store_backend() {
    let cli = Cli::try_parse_from(["rlguard-syncer"]).unwrap();
    assert!(!cli.use_coordination_backend());
}

#[test]
fn liveness_ttl_is_twice_the_fastest_policys_interval() {
    let policies = vec![
        Policy::new(PolicyType::Requests, 50, 10, 200_000_000, 50.0),
        Policy::new(PolicyType::ProcessingUnits, 200, 10, 50_000_000, 200.0),
    ];
    // PU policy refills every 100ms (batched from 50ms), RQ every 200ms;
    // the tighter 0.1s interval should drive the TTL.
    let ttl = derive_liveness_ttl_ms(&policies, None);
    assert_eq!(ttl, 200);
}

#[test]
fn explicit_revisit_time_overrides_derivation() {
    let policies = vec![Policy::new(PolicyType::Requests, 50, 10, 1_000_000_000, 50.0)];
    let ttl = derive_liveness_ttl_ms(&policies, Some(Duration::from_millis(4242)));
    assert_eq!(ttl, 4242);
}
