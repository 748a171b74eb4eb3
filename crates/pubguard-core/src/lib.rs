//! pubguard-core library.
//!
//! Per-campaign publisher blacklisting from raw tracking events: events are
//! folded into counters ([`aggregate`]), the counters are paged back out and
//! judged against each campaign's ratio threshold ([`evaluate`]), and the
//! resulting deltas are turned into notifications and a saved blacklist
//! ([`reconcile`]). [`job::OptimizationJob`] wires one run together.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums in library code ([`error::JobError`],
//!   [`error::StoreError`]); `anyhow::Result` for config loading.
//! - **Logging**: `tracing` macros only; subscribers are the binary's job.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod job;
pub mod lock;
pub mod model;
pub mod reconcile;
pub mod source;
pub mod store;

pub use error::{ErrorCode, JobError, StoreError};
pub use job::{CampaignOutcome, JobReport, OptimizationJob};
