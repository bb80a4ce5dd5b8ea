//! Environment-derived configuration (spec.md §6).
//!
//! Nothing here is process-global: callers load a [`Config`] once at
//! startup (typically via [`Config::from_env`]) and thread it through, the
//! way the teacher crate's request builders take an explicit `&Config`
//! rather than reach for a static.

use std::env;
use std::time::Duration;

use crate::error::{Result, RlguardError};

const DEFAULT_ROOT_URL: &str = "https://services.sentinel-hub.com";
const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;

/// Which shared-counter backend the syncer and workers should use.
///
/// Selected by the syncer's CLI argument and mirrored into the repository
/// the syncer exposes; workers are told which backend to dial via their
/// own copy of this config (spec.md §4.1 — the two sides never need to
/// agree out of band, they just both read the same environment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Networked hash-store backend (Redis: `HINCRBYFLOAT` + key TTL).
    Redis { host: String, port: u16 },
    /// Coordination-service backend (etcd, standing in for the original
    /// ZooKeeper counters — see DESIGN.md).
    Coordination { endpoints: Vec<String> },
}

/// Process configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub root_url: String,
    pub backend: Backend,
    /// `None` disables the periodic statistics re-sync (spec.md §4.3).
    pub refresh_buckets: Option<Duration>,
    /// `None` means derive the liveness TTL from the policy set instead
    /// (spec.md §4.3: `2 * min(fill_interval_s)`).
    pub revisit_time: Option<Duration>,
}

impl Config {
    /// Load configuration for the `zookeeper`-flavoured coordination
    /// backend, or the default Redis backend otherwise — mirrors the
    /// syncer CLI's single positional argument (spec.md §6).
    pub fn from_env(use_coordination_backend: bool) -> Result<Self> {
        let client_id = required_env("CLIENT_ID")?;
        let client_secret = strip_surrounding_quotes(required_env("CLIENT_SECRET")?);

        let root_url = env::var("SENTINELHUB_ROOT_URL").unwrap_or_else(|_| DEFAULT_ROOT_URL.into());

        let backend = if use_coordination_backend {
            let endpoints = env::var("ZOOKEEPER_HOSTS")
                .map_err(|_| RlguardError::MissingEnv("ZOOKEEPER_HOSTS".into()))?
                .split(',')
                .map(|s| normalize_endpoint(s.trim()))
                .collect();
            Backend::Coordination { endpoints }
        } else {
            let host = env::var("REDIS_HOST").unwrap_or_else(|_| DEFAULT_REDIS_HOST.into());
            let port = match env::var("REDIS_PORT") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| RlguardError::Config(format!("invalid REDIS_PORT: {raw}")))?,
                Err(_) => DEFAULT_REDIS_PORT,
            };
            Backend::Redis { host, port }
        };

        let refresh_buckets = optional_secs_env("REFRESH_BUCKETS_SEC")?;
        let revisit_time = optional_millis_env("REVISIT_TIME_MSEC")?;

        Ok(Self {
            client_id,
            client_secret,
            root_url,
            backend,
            refresh_buckets,
            revisit_time,
        })
    }

    /// `tracing` log level, from `LOGLEVEL`; defaults to `info`.
    pub fn log_level() -> String {
        env::var("LOGLEVEL").unwrap_or_else(|_| "info".into())
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| RlguardError::MissingEnv(key.into()))
}

/// The upstream occasionally ships `CLIENT_ID`/`CLIENT_SECRET` wrapped in a
/// literal pair of double quotes (copy-pasted from a `.env` template);
/// strip them only when both are present, to avoid mangling a secret that
/// legitimately starts or ends with `"`.
fn strip_surrounding_quotes(value: String) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value
    }
}

fn normalize_endpoint(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

fn optional_secs_env(key: &str) -> Result<Option<Duration>> {
    match env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|_| RlguardError::Config(format!("invalid {key}: {raw}")))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

fn optional_millis_env(key: &str) -> Result<Option<Duration>> {
    match env::var(key) {
        Ok(raw) => {
            let millis: u64 = raw
                .parse()
                .map_err(|_| RlguardError::Config(format!("invalid {key}: {raw}")))?;
            Ok(Some(Duration::from_millis(millis)))
        }
        Err(_) => Ok(None),
    }
}
