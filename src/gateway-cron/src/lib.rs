//! Cron Scheduler (§4.K): persisted, per-user scheduled command
//! execution with retries and a process-wide concurrency cap.

pub mod dispatch;
pub mod job;
pub mod scheduler;

pub use dispatch::{dispatch, dispatch_with_timeout, AgentInvoker};
pub use job::{CronJob, CronJobStore, FileJobKv, JobKv};
pub use scheduler::{compute_next, CronScheduler, CronSettings};
