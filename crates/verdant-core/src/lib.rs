//! `verdant-core` — configuration, error and shared types used by every
//! verdant crate.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::VerdantConfig;
pub use error::{Result, VerdantError};
pub use time::{Clock, FixedRandom, ManualClock, RandomSource, SystemClock, ThreadRandom};
pub use types::{JobId, Period};
