//! Bootstrap entrypoint for the rlguard syncer (spec.md §4.3, §6).
//!
//! State machine: `BOOT -> AUTH -> LOAD_POLICIES -> INIT_REPO -> RUN`,
//! looping back to `BOOT` whenever `RUN` exits. In practice `RUN` only
//! exits by restarting the loop (the only observed trigger in the
//! original is an operator-initiated process restart after the policy
//! set changes); transient failures at every earlier stage retry in
//! place rather than unwinding to `BOOT`.

use std::process::ExitCode;

use clap::Parser;
use rlguard_core::config::{Backend, Config};
use rlguard_core::repository::{EtcdRepository, RedisRepository, Repository};
use rlguard_core::{jwt, Result, UpstreamClient};
use rlguard_syncer::cli::Cli;
use rlguard_syncer::constants::{ETCD_KEY_BASE, RETRY_DELAY};
use rlguard_syncer::scheduler;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env(cli.use_coordination_backend()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: {err}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    init_tracing(&Config::log_level());

    tokio::select! {
        _ = run_forever(&config) => unreachable!("the bootstrap loop never returns on its own"),
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, stopping");
            ExitCode::SUCCESS
        }
    }
}

/// Quiet the etcd client's own logging unless the operator explicitly
/// asked for something more verbose, the same way the original silences
/// the ZooKeeper client's logger (spec.md §9, SPEC_FULL.md §11).
fn init_tracing(level: &str) {
    let directive = format!("{level},etcd_client=warn");
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info,etcd_client=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_forever(config: &Config) -> ! {
    let upstream = UpstreamClient::new(config.root_url.clone());

    loop {
        let auth_token = acquire_auth_token(&upstream, config).await;

        let user_id = match jwt::extract_user_id(&auth_token) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "access token is malformed, restarting boot sequence");
                continue;
            }
        };

        let policies = fetch_policies(&upstream, &auth_token, &user_id).await;
        let liveness_ttl_ms = scheduler::derive_liveness_ttl_ms(&policies, config.revisit_time);

        let repo = connect_repository(config).await;
        if let Err(err) = repo.init_rate_limits(&policies, liveness_ttl_ms).await {
            warn!(error = %err, "failed to initialize shared rate limit state, restarting boot sequence");
            continue;
        }

        info!(
            policy_count = policies.len(),
            liveness_ttl_ms, "entering run loop"
        );

        scheduler::run(
            repo.as_ref(),
            &upstream,
            &config.client_id,
            &config.client_secret,
            &policies,
            liveness_ttl_ms,
            config.refresh_buckets,
            auth_token,
        )
        .await;

        info!("restarting...");
    }
}

async fn acquire_auth_token(upstream: &UpstreamClient, config: &Config) -> String {
    loop {
        match upstream
            .request_auth_token(&config.client_id, &config.client_secret)
            .await
        {
            Ok(token) => return token,
            Err(err) => {
                warn!(error = %err, "could not fetch auth token, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

async fn fetch_policies(
    upstream: &UpstreamClient,
    auth_token: &str,
    user_id: &str,
) -> Vec<rlguard_core::Policy> {
    loop {
        match upstream.fetch_rate_limits(auth_token, user_id).await {
            Ok(policies) => return policies,
            Err(err) => {
                warn!(error = %err, "could not fetch rate limit contract, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

async fn connect_repository(config: &Config) -> Box<dyn Repository> {
    loop {
        let connected: Result<Box<dyn Repository>> = match &config.backend {
            Backend::Redis { host, port } => RedisRepository::connect(host, *port)
                .await
                .map(|r| Box::new(r) as Box<dyn Repository>),
            Backend::Coordination { endpoints } => {
                EtcdRepository::connect(endpoints, ETCD_KEY_BASE)
                    .await
                    .map(|r| Box::new(r) as Box<dyn Repository>)
            }
        };
        match connected {
            Ok(repo) => return repo,
            Err(err) => {
                warn!(error = %err, "could not connect to the shared state backend, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
