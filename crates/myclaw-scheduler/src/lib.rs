//! `myclaw-scheduler` — JSON-file persisted job scheduler (§4.8).
//!
//! Schedule kinds:
//!
//! | Kind    | Behaviour                                                  |
//! |---------|-------------------------------------------------------------|
//! | `cron`  | 6-field expression including seconds, minute-granularity matcher |
//! | `every` | Re-fires when `now - last_run_ms >= interval_ms`             |
//! | `at`    | One-shot absolute epoch milliseconds; disables itself after firing |

pub mod cron;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

pub use cron::{CronSchedule, MinuteCron};
pub use engine::{JobHandler, SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use store::JobStore;
pub use types::{CronJob, CronPayload, JobKind, JobState};
