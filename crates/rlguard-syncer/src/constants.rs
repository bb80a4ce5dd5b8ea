//! Fixed delays and defaults for the bootstrap loop and scheduler
//! (spec.md §4.2, §4.3, §7).

use std::time::Duration;

/// Delay between retries of upstream auth/contract fetches, and of
/// repository (re)connection, when the syncer can't yet reach either
/// (spec.md §7: "log warn, sleep 5 s, retry").
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Floor under which a rescheduled task is never placed, so drift
/// correction can't produce a zero or negative sleep (spec.md §4.3).
pub const MIN_RESCHEDULE_DELAY: Duration = Duration::from_millis(1);

/// Default JWT expiry pre-emption margin: re-acquire the access token
/// this many seconds before it actually expires (spec.md §4.2).
pub const DEFAULT_EXP_MARGIN_S: i64 = 300;

/// Root path under which the etcd coordination-service backend keys its
/// per-policy counters and metadata (spec.md §6), standing in for the
/// original `/openeo/rlguard` ZooKeeper base path.
pub const ETCD_KEY_BASE: &str = "/openeo/rlguard";
