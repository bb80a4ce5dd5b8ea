//! Upstream client (spec.md §4.2, §6) — out-of-scope collaborator.
//!
//! Plain request/response plumbing against the three upstream endpoints,
//! with a short exponential-backoff-with-jitter retry around transient
//! network failures (timeout, connect, 5xx) — the same shape as the
//! teacher's `ConnectionPool::execute_with_retry`. This is a fast,
//! bounded retry for blips; it does not replace the syncer's own
//! unbounded 5s-interval retry loop for sustained outages (spec.md §4.3,
//! §7) — a non-retryable or exhausted failure still surfaces as an
//! `Err` for the bootstrap loop to catch and retry at its own cadence.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{Result, RlguardError};
use crate::policy::{Policy, PolicyType};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: usize = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2_000;

fn is_retryable(err: &RlguardError) -> bool {
    match err {
        RlguardError::Upstream(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        RlguardError::UpstreamStatus { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Retry `operation` with exponential backoff and jitter on transient
/// failures, up to `MAX_RETRIES` extra attempts.
async fn execute_with_retry<F, Fut, T>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES && is_retryable(&err) => {
                attempt += 1;
                let jitter = rand::rng().random_range(0..100u64);
                let delay = Duration::from_millis(backoff_ms + jitter);
                tracing::warn!(attempt, error = %err, delay_ms = delay.as_millis(), "retrying upstream request");
                tokio::time::sleep(delay).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }
}

/// HTTP client bound to one upstream root URL.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    root_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ContractEnvelope {
    data: Vec<ContractEntry>,
}

#[derive(Debug, Deserialize)]
struct ContractEntry {
    policies: Vec<ContractPolicy>,
    #[serde(rename = "type")]
    policy_type: ContractPolicyType,
}

#[derive(Debug, Deserialize)]
struct ContractPolicyType {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ContractPolicy {
    capacity: u64,
    #[serde(rename = "samplingPeriod")]
    sampling_period: u64,
    #[serde(rename = "nanosBetweenRefills")]
    nanos_between_refills: u64,
}

#[derive(Debug, Deserialize)]
struct StatsEnvelope {
    data: HashMap<String, HashMap<String, f64>>,
}

impl UpstreamClient {
    pub fn new(root_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            root_url: root_url.into(),
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status() == StatusCode::OK {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(RlguardError::UpstreamStatus { status, body })
    }

    /// `POST /oauth/token` with client-credentials grant.
    pub async fn request_auth_token(&self, client_id: &str, client_secret: &str) -> Result<String> {
        execute_with_retry(|| async {
            let resp = self
                .client
                .post(format!("{}/oauth/token", self.root_url))
                .form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                ])
                .send()
                .await?;
            let resp = Self::check_status(resp).await?;
            let body: TokenResponse = resp.json().await?;
            Ok(body.access_token)
        })
        .await
    }

    /// `GET /aux/ratelimit/statistics/tokenCounts/<user_id>`, keyed by
    /// upstream long-form type name then by sampling period (as a string,
    /// matching the upstream's JSON object keys).
    pub async fn fetch_current_stats(
        &self,
        auth_token: &str,
        user_id: &str,
    ) -> Result<HashMap<String, HashMap<String, f64>>> {
        execute_with_retry(|| async {
            let resp = self
                .client
                .get(format!(
                    "{}/aux/ratelimit/statistics/tokenCounts/{user_id}",
                    self.root_url
                ))
                .bearer_auth(auth_token)
                .send()
                .await?;
            let resp = Self::check_status(resp).await?;
            let body: StatsEnvelope = resp.json().await?;
            Ok(body.data)
        })
        .await
    }

    /// `GET /aux/ratelimit/contract?userId=eq:<user_id>`, combined with a
    /// statistics fetch to seed each policy's `initial` remaining count
    /// (spec.md §6).
    pub async fn fetch_rate_limits(&self, auth_token: &str, user_id: &str) -> Result<Vec<Policy>> {
        let contract: ContractEnvelope = execute_with_retry(|| async {
            let resp = self
                .client
                .get(format!("{}/aux/ratelimit/contract", self.root_url))
                .query(&[("userId", format!("eq:{user_id}"))])
                .bearer_auth(auth_token)
                .send()
                .await?;
            let resp = Self::check_status(resp).await?;
            Ok(resp.json().await?)
        })
        .await?;

        let stats = self.fetch_current_stats(auth_token, user_id).await?;

        let mut policies = Vec::new();
        for entry in contract.data {
            let policy_type = PolicyType::from_upstream_name(&entry.policy_type.name)
                .ok_or_else(|| {
                    RlguardError::Config(format!(
                        "unknown upstream policy type: {}",
                        entry.policy_type.name
                    ))
                })?;
            for policy in entry.policies {
                let remaining = stats
                    .get(&entry.policy_type.name)
                    .and_then(|by_period| by_period.get(&policy.sampling_period.to_string()))
                    .copied()
                    .unwrap_or(policy.capacity as f64);

                tracing::info!(
                    policy_type = entry.policy_type.name,
                    remaining,
                    capacity = policy.capacity,
                    nanos_between_refills = policy.nanos_between_refills,
                    "found rate limiting policy"
                );

                policies.push(Policy::new(
                    policy_type,
                    policy.capacity,
                    policy.sampling_period,
                    policy.nanos_between_refills,
                    remaining,
                ));
            }
        }
        Ok(policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn request_auth_token_parses_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok.en.here"
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri());
        let token = client.request_auth_token("id", "secret").await.unwrap();
        assert_eq!(token, "tok.en.here");
    }

    #[tokio::test]
    async fn fetch_rate_limits_joins_contract_and_statistics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aux/ratelimit/contract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "policies": [{"capacity": 300000, "samplingPeriod": 60, "nanosBetweenRefills": 200000}],
                    "type": {"name": "PROCESSING_UNITS"}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/aux/ratelimit/statistics/tokenCounts/user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"PROCESSING_UNITS": {"60": 123456.0}}
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri());
        let policies = client.fetch_rate_limits("tok", "user-1").await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].id, "PU_300000_60");
        assert_eq!(policies[0].initial, 123456.0);
    }

    #[tokio::test]
    async fn server_error_is_retried_until_it_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "recovered"
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri());
        let token = client.request_auth_token("id", "secret").await.unwrap();
        assert_eq!(token, "recovered");
    }

    #[tokio::test]
    async fn non_200_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri());
        let err = client.request_auth_token("id", "bad").await.unwrap_err();
        assert!(matches!(err, RlguardError::UpstreamStatus { status: 401, .. }));
    }
}
