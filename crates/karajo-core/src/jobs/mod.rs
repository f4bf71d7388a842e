pub mod gate;
pub mod job_base;
pub mod job_exec;
pub mod job_http;
pub mod job_log;
pub mod scheduler;
pub mod webhook_auth;

pub use gate::Gate;
pub use job_base::{JobBase, Trigger};
pub use job_exec::{Execution, JobExec, WebhookRequest};
pub use job_http::{JobHttp, RequestType};
pub use job_log::{JobKind, JobLog, Status};
pub use scheduler::CalendarSchedule;
pub use webhook_auth::AuthKind;
