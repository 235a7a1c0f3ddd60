//! `verdant-scheduler` — carbon-aware deferral of background jobs.
//!
//! # Overview
//!
//! A job created in the `AWAITING` state carries a window `[from, to]`. The
//! [`engine::CarbonAwareEngine`] re-evaluates every awaiting job on a short
//! cadence and moves it to `SCHEDULED` or `ENQUEUED` once the
//! [`policy::CarbonAwarePolicy`] has picked an instant. A second, daily entry
//! refreshes the forecast the policy reads. Both run on the drift-free
//! [`periodic::PeriodicScheduler`]; jobs persist through [`store::JobStore`].
//!
//! # Decision order
//!
//! | Rule | Condition                              | Outcome                     |
//! |------|----------------------------------------|-----------------------------|
//! | 1    | deadline passed                        | commit now                  |
//! | 2    | deadline within the hour               | commit now                  |
//! | 3    | no forecast data for the window        | commit on deadline day (or the evening before), else wait |
//! | 4    | forecast data available                | schedule on cheapest bucket |

pub mod db;
pub mod engine;
pub mod error;
pub mod failure;
pub mod job;
pub mod periodic;
pub mod policy;
pub mod schedule;
pub mod state;
pub mod store;

pub use engine::{CarbonAwareEngine, DeferralEvaluator, EvaluationReport, ForecastRefresher};
pub use error::{Result, SchedulerError};
pub use failure::{FailureDescription, StoredFailure};
pub use job::Job;
pub use periodic::{task_fn, EntryId, EntryState, PeriodicScheduler, PeriodicTask};
pub use policy::{CarbonAwarePolicy, Decision};
pub use state::{is_allowed, is_illegal, JobState, StateKind};
pub use store::{AwaitingCursor, AwaitingPage, JobStore, SqliteJobStore};
