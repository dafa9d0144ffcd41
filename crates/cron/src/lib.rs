//! Cron scheduling for the krill agent gateway.
//!
//! [`parser`] turns standard five-field expressions into normalized value
//! sets and answers "does this fire now" / "when does this fire next".
//! [`scheduler`] drives a minute-tick loop over a named task registry.

pub mod parser;
pub mod scheduler;

pub use parser::{CronExpression, matches, next_occurrence, parse_cron};
pub use scheduler::{
    CronListParams, CronRunsParams, CronScheduler, CronTask, CronTaskInfo, RunRecord, RunStatus,
};
