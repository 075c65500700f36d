//! Meter-event delivery for tally.
//!
//! This crate owns the boundary to the external metered-billing provider:
//!
//! - [`MeterProvider`]: the abstract event-ingestion interface the worker
//!   delivers through
//! - [`HttpMeterClient`]: the `reqwest` implementation with provider error
//!   classification
//! - [`MeterQueue`]: durable, idempotency-keyed enqueue over the store
//! - [`MeterWorker`]: the rate-limited, bounded-concurrency delivery loop
//!   with exponential backoff and graceful shutdown
//!
//! Jobs survive process restarts: the queue persists every job before
//! acknowledging the enqueue, and the worker re-delivers anything left
//! waiting or mid-flight after a crash. Idempotency keys make that
//! re-delivery safe.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backoff;
pub mod http;
pub mod provider;
pub mod queue;
pub mod worker;

pub use backoff::ExponentialBackoff;
pub use http::HttpMeterClient;
pub use provider::{EventSummary, MeterProvider, ProviderError};
pub use queue::{MeterEvent, MeterQueue};
pub use worker::{MeterWorker, ProviderMode, WorkerConfig};
