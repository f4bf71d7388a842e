//! `JobBase`: identity, status field, history, scheduler/interval/next-run
//! state, webhook auth dispatch, log factory, retention, and the
//! `canStart`/`pause`/`resume`/`finish` transitions shared by `JobExec` and
//! `JobHTTP`.

use crate::error::{Error, Result};
use crate::jobs::gate::Gate;
use crate::jobs::job_log::{self, JobKind, JobLog, ReplayedLog, Status};
use crate::jobs::scheduler::CalendarSchedule;
use crate::time::Clock;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const MIN_INTERVAL: Duration = Duration::minutes(1);
pub const DEFAULT_LOG_RETENTION: usize = 5;

/// Message pushed to the manager's notification fan-out whenever a run
/// reaches a terminal state.
#[derive(Debug, Clone)]
pub struct LogNotification {
    pub job_id: String,
    pub counter: i64,
    pub status: Status,
    pub notify: Vec<String>,
    /// The run's log content, handed to `NotifClient::send`'s `message`
    /// parameter.
    pub message: String,
}

/// A lightweight record of a past run, cheap enough to keep in memory for
/// the whole retained window; the full buffer lives on disk and is loaded
/// lazily via `JobLog::load`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub counter: i64,
    pub status: Status,
    pub path: PathBuf,
}

struct MutableState {
    status: Status,
    counter: i64,
    logs: Vec<LogRecord>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
}

/// Either a recurring calendar schedule or a fixed interval; mutually
/// exclusive per the data model invariant (schedule wins when both are
/// configured).
pub enum Trigger {
    Schedule(CalendarSchedule),
    Interval(Duration),
}

pub struct JobBase {
    pub name: String,
    pub id: String,
    pub kind: JobKind,
    pub description: String,
    pub trigger: Option<Trigger>,
    pub log_retention: usize,
    pub notif_on_success: Vec<String>,
    pub notif_on_failed: Vec<String>,
    pub dir_work: PathBuf,
    pub dir_log: PathBuf,
    pub gate: Gate,
    notif_tx: Option<mpsc::Sender<LogNotification>>,
    clock: Arc<dyn Clock>,
    state: Mutex<MutableState>,
}

/// Normalizes a job name into an id: non-alphanumerics become `-`.
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

impl JobBase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        kind: JobKind,
        description: &str,
        trigger: Option<Trigger>,
        log_retention: usize,
        notif_on_success: Vec<String>,
        notif_on_failed: Vec<String>,
        dir_work: PathBuf,
        dir_log: PathBuf,
        gate: Gate,
        notif_tx: Option<mpsc::Sender<LogNotification>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let log_retention = if log_retention == 0 { DEFAULT_LOG_RETENTION } else { log_retention };
        Self {
            name: name.to_string(),
            id: normalize(name),
            kind,
            description: description.to_string(),
            trigger,
            log_retention,
            notif_on_success,
            notif_on_failed,
            dir_work,
            dir_log,
            gate,
            notif_tx,
            clock,
            state: Mutex::new(MutableState {
                status: Status::Started,
                counter: 0,
                logs: Vec::new(),
                last_run: None,
                next_run: None,
            }),
        }
    }

    /// Reconstructs counter/status/logs/lastRun from the job's log
    /// directory, per the startup replay algorithm, then applies retention.
    pub fn replay(&self) -> Result<()> {
        let mut entries = job_log::replay(&self.dir_log)?;
        job_log::prune(&mut entries, self.log_retention)?;

        let mut state = self.state.lock().expect("job mutex poisoned");
        if let Some(newest) = entries.last() {
            state.counter = newest.counter;
            state.status = newest.status;
            state.last_run = Some(newest.mtime);
        }
        state.logs = entries
            .into_iter()
            .map(|e| LogRecord { counter: e.counter, status: e.status, path: e.path })
            .collect();
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.state.lock().expect("job mutex poisoned").status
    }

    /// The job's view of "now" — goes through the injected clock so the
    /// select loop's scheduling math stays deterministic under a `TestClock`.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("job mutex poisoned").last_run
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("job mutex poisoned").next_run
    }

    /// `status`/`last_run`/`next_run` under a single lock acquisition, so a
    /// snapshot taken for the control plane can't observe a torn combination
    /// if `finish()` runs between three separate locked reads.
    pub fn snapshot_state(&self) -> (Status, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let state = self.state.lock().expect("job mutex poisoned");
        (state.status, state.last_run, state.next_run)
    }

    pub fn log_count(&self) -> usize {
        self.state.lock().expect("job mutex poisoned").logs.len()
    }

    pub fn log_path(&self, counter: i64) -> Option<PathBuf> {
        self.state
            .lock()
            .expect("job mutex poisoned")
            .logs
            .iter()
            .find(|l| l.counter == counter)
            .map(|l| l.path.clone())
    }

    pub fn log_records(&self) -> Vec<LogRecord> {
        self.state.lock().expect("job mutex poisoned").logs.clone()
    }

    /// Lazily reads a retained log's content straight from disk, matching
    /// `JobLog::load`'s "fetch on demand" semantics for the control plane's
    /// log endpoint.
    pub fn read_log(&self, counter: i64) -> Result<Option<Vec<u8>>> {
        match self.log_path(counter) {
            Some(path) => Ok(Some(std::fs::read(path)?)),
            None => Ok(None),
        }
    }

    /// `paused`-error if the job is paused, otherwise OK.
    pub fn can_start(&self) -> Result<()> {
        let state = self.state.lock().expect("job mutex poisoned");
        if state.status == Status::Paused {
            return Err(Error::paused(format!("job {} is paused", self.id)));
        }
        Ok(())
    }

    /// Allocates the next counter, opens a new `JobLog`, and marks the job
    /// `running` (unless paused). Applies retention pruning afterward.
    pub fn new_log(&self) -> JobLog {
        let mut state = self.state.lock().expect("job mutex poisoned");
        state.counter += 1;
        let counter = state.counter;
        let paused = state.status == Status::Paused;
        if !paused {
            state.status = Status::Running;
        }
        state.last_run = Some(self.clock.now());

        let mut log = JobLog::new(self.kind, &self.id, &self.dir_log, counter, self.notify_list(false));
        if paused {
            log.set_status(Status::Paused);
        }
        log
    }

    /// `finish` per the state machine: writes the error (if any), sets the
    /// terminal status, computes `nextRun`, flushes, prunes retention, and
    /// (for non-paused runs) fans the log out to the notification sink.
    pub fn finish(&self, mut log: JobLog, err: Option<Error>) -> Result<()> {
        let was_paused = log.status == Status::Paused;

        if !was_paused {
            match &err {
                Some(e) => {
                    log.write_line(&format!("error: {e}"));
                    log.set_status(Status::Failed);
                }
                None => {
                    log.set_status(Status::Success);
                }
            }
        }

        let next_run = self.compute_next_run();

        log.flush()?;

        let record = LogRecord { counter: log.counter, status: log.status, path: log.path() };

        {
            let mut state = self.state.lock().expect("job mutex poisoned");
            state.status = log.status;
            state.next_run = next_run;
            state.logs.push(record);
            if state.logs.len() > self.log_retention {
                let remove_count = state.logs.len() - self.log_retention;
                for removed in state.logs.drain(0..remove_count) {
                    let _ = std::fs::remove_file(&removed.path);
                }
            }
        }

        if !was_paused {
            let message = String::from_utf8_lossy(log.contents()).into_owned();
            self.send_notification(log.counter, log.status, message);
        }

        Ok(())
    }

    fn compute_next_run(&self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        match &self.trigger {
            Some(Trigger::Schedule(sched)) => Some(sched.next_fire(now)),
            Some(Trigger::Interval(interval)) => {
                let last_run = self.last_run().unwrap_or(now);
                Some(last_run + *interval)
            }
            None => None,
        }
    }

    /// Non-blocking send: if no receiver is ready the log is still
    /// persisted but the notification is dropped.
    fn send_notification(&self, counter: i64, status: Status, message: String) {
        let Some(tx) = &self.notif_tx else { return };
        let notify = self.notify_list(status == Status::Failed);
        if notify.is_empty() {
            return;
        }
        let msg = LogNotification { job_id: self.id.clone(), counter, status, notify, message };
        if tx.try_send(msg).is_err() {
            tracing::debug!(job_id = %self.id, "notification dropped: no receiver ready");
        }
    }

    fn notify_list(&self, failed: bool) -> Vec<String> {
        if failed {
            self.notif_on_failed.clone()
        } else {
            self.notif_on_success.clone()
        }
    }

    /// `pause` is accepted in any state.
    pub fn pause(&self) {
        let mut state = self.state.lock().expect("job mutex poisoned");
        state.status = Status::Paused;
    }

    /// `resume` rewrites status to whatever the caller supplies
    /// (`started` by default).
    pub fn resume(&self, to: Status) {
        let mut state = self.state.lock().expect("job mutex poisoned");
        state.status = to;
    }

    pub fn computed_interval(raw: Duration) -> Duration {
        if raw < MIN_INTERVAL {
            MIN_INTERVAL
        } else {
            raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;
    use tempfile::tempdir;

    fn new_job(dir: &std::path::Path, trigger: Option<Trigger>) -> JobBase {
        JobBase::new(
            "My Job!",
            JobKind::Exec,
            "",
            trigger,
            5,
            vec!["ok".into()],
            vec!["fail".into()],
            dir.join("work"),
            dir.join("log"),
            Gate::new(1),
            None,
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn normalize_replaces_non_alphanumerics() {
        assert_eq!(normalize("My Job!"), "My-Job-");
    }

    #[test]
    fn can_start_rejects_paused_jobs() {
        let dir = tempdir().unwrap();
        let job = new_job(dir.path(), None);
        assert!(job.can_start().is_ok());
        job.pause();
        assert!(matches!(job.can_start(), Err(Error::Paused(_))));
    }

    #[test]
    fn pause_then_trigger_produces_paused_log_with_no_commands() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let job = new_job(dir.path(), None);
        job.pause();
        let log = job.new_log();
        assert_eq!(log.status, Status::Paused);
        job.finish(log, None).unwrap();
        assert_eq!(job.status(), Status::Paused);
        assert_eq!(job.log_count(), 1);
    }

    #[test]
    fn finish_success_then_failure_transitions() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let job = new_job(dir.path(), None);

        let log1 = job.new_log();
        job.finish(log1, None).unwrap();
        assert_eq!(job.status(), Status::Success);

        let log2 = job.new_log();
        job.finish(log2, Some(Error::internal("boom"))).unwrap();
        assert_eq!(job.status(), Status::Failed);
    }

    #[test]
    fn retention_keeps_only_newest_n() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let job = new_job(dir.path(), None);
        for _ in 0..7 {
            let log = job.new_log();
            job.finish(log, None).unwrap();
        }
        assert_eq!(job.log_count(), 5);
        let remaining = std::fs::read_dir(dir.path().join("log")).unwrap().count();
        assert_eq!(remaining, 5);
    }

    #[test]
    fn interval_is_coerced_up_to_one_minute() {
        assert_eq!(JobBase::computed_interval(Duration::seconds(10)), MIN_INTERVAL);
        assert_eq!(JobBase::computed_interval(Duration::minutes(5)), Duration::minutes(5));
    }

    #[test]
    fn resume_sets_status_without_running_anything() {
        let dir = tempdir().unwrap();
        let job = new_job(dir.path(), None);
        job.pause();
        job.resume(Status::Started);
        assert_eq!(job.status(), Status::Started);
    }
}
