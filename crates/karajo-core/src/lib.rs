//! Core job-manager types: the calendar scheduler, the exec and HTTP job
//! state machines, file-based job-log persistence, webhook authorization,
//! the configuration loader, and the manager that ties them together.

pub mod build;
pub mod env;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod notification;
pub mod time;

pub use build::{build_manager, register_call_job, CallJobConfig};
pub use env::Env;
pub use error::{Error, Result};
pub use jobs::{
    AuthKind, CalendarSchedule, Execution, Gate, JobBase, JobExec, JobHttp, JobKind, JobLog,
    RequestType, Status, Trigger, WebhookRequest,
};
pub use manager::Manager;
pub use notification::{NotifClient, NotifRegistry, WebhookNotifClient};
pub use time::{Clock, SystemClock, TestClock};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
