//! `verdant-forecast` — acquisition and in-memory model of the cost signal
//! (carbon intensity or day-ahead price) that deferred jobs are placed on.
//!
//! The [`client::ForecastClient`] fetches the provider's JSON document with
//! bounded retries and turns it into an immutable [`snapshot::ForecastSnapshot`].
//! Snapshots are published through a [`snapshot::SnapshotCell`], which swaps
//! the whole value at once so readers never see a half-updated forecast.

pub mod client;
pub mod error;
pub mod retry;
pub mod snapshot;
pub mod wire;

pub use client::ForecastClient;
pub use error::{ForecastError, Result};
pub use retry::{retry, retry_if, RetryPolicy};
pub use snapshot::{ForecastPoint, ForecastSnapshot, SnapshotCell};
