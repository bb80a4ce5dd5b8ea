#![forbid(unsafe_code)]
//! # rlguard-core
//!
//! Shared-state primitives for a client-side, distributed rate-limiting
//! coordinator: the [`Policy`] model and PU cost calculator, the
//! [`UpstreamClient`] that talks to the quota-governing API, the
//! [`Repository`] abstraction over the shared counter store (with Redis
//! and etcd backends), and the worker [`admission`] algorithm that turns
//! atomic counter decrements into a required wait.
//!
//! None of the types here hold process-global state: a [`Repository`] is
//! constructed once at startup and passed explicitly to whichever code
//! needs it, the way the syncer and the worker admission library both do.
//!
//! [`admission`]: crate::admission

pub mod admission;
pub mod config;
pub mod error;
pub mod jwt;
pub mod policy;
pub mod pu;
pub mod repository;
pub mod upstream;

pub use admission::{apply_for_request, AdmissionError};
pub use error::{RlguardError, Result};
pub use policy::{adjust_filling, OutputFormat, Policy, PolicyType};
pub use pu::calculate_processing_units;
pub use repository::Repository;
pub use upstream::UpstreamClient;
