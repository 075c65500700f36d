//! Tally service: the credit ledger, usage pipeline, and HTTP API.
//!
//! This crate ties the workspace together:
//!
//! - [`Ledger`]: per-account serialized balance mutations with lazy
//!   carry-over expiry and monthly allocation
//! - [`UsagePipeline`]: usage accumulation and idempotent period reporting
//! - [`Reconciler`] / [`ReconcileScheduler`]: the scheduled cumulative
//!   usage sync and auto-top-up scan
//! - [`create_router`] / [`AppState`]: the Axum HTTP surface
//!
//! The service exposes no authentication layer; deployments front it with
//! their own gateway.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod pipeline;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use ledger::{Affordability, Ledger};
pub use pipeline::{ReportOutcome, UsagePipeline};
pub use reconcile::{ReconcileScheduler, Reconciler};
pub use routes::create_router;
pub use state::AppState;
