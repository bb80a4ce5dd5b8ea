//! Error types shared by every module in this crate.

use thiserror::Error;

/// Errors produced by the repository, upstream client, and admission
/// algorithm.
#[derive(Debug, Error)]
pub enum RlguardError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("failed to decode upstream JSON payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed access token: {0}")]
    MalformedToken(String),

    #[error("redis backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("etcd backend error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("etcd node {0} missing or empty")]
    EtcdNodeMissing(String),

    #[error("required environment variable {0} is not set")]
    MissingEnv(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, RlguardError>;
