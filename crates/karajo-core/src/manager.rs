//! Owns the shared concurrency gate, every configured job, and the
//! notification fan-out. `start`/`stop` spawn and tear down one task per job
//! plus one dispatcher task draining the log-notification sink.

use crate::error::{Error, Result};
use crate::jobs::gate::Gate;
use crate::jobs::job_base::LogNotification;
use crate::jobs::job_exec::JobExec;
use crate::jobs::job_http::JobHttp;
use crate::notification::NotifRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Notification sink capacity: bursts beyond this are dropped rather than
/// backed up, per the manager's non-blocking fan-out contract.
const LOG_SINK_CAPACITY: usize = 256;

/// Grace period for in-flight runs to finish before a stop forcibly drops
/// job tasks.
const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

pub struct Manager {
    pub gate: Gate,
    exec_jobs: HashMap<String, Arc<JobExec>>,
    http_jobs: HashMap<String, Arc<JobHttp>>,
    notif: NotifRegistry,
    log_sink_tx: mpsc::Sender<LogNotification>,
    log_sink_rx: std::sync::Mutex<Option<mpsc::Receiver<LogNotification>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(max_job_running: usize, notif: NotifRegistry) -> (Self, mpsc::Sender<LogNotification>) {
        let gate = Gate::new(max_job_running);
        let (log_sink_tx, log_sink_rx) = mpsc::channel(LOG_SINK_CAPACITY);
        let manager = Self {
            gate,
            exec_jobs: HashMap::new(),
            http_jobs: HashMap::new(),
            notif,
            log_sink_tx: log_sink_tx.clone(),
            log_sink_rx: std::sync::Mutex::new(Some(log_sink_rx)),
            handles: std::sync::Mutex::new(Vec::new()),
        };
        (manager, log_sink_tx)
    }

    pub fn log_sink(&self) -> mpsc::Sender<LogNotification> {
        self.log_sink_tx.clone()
    }

    pub fn add_exec_job(&mut self, job: Arc<JobExec>) {
        self.exec_jobs.insert(job.base.id.clone(), job);
    }

    pub fn add_http_job(&mut self, job: Arc<JobHttp>) {
        self.http_jobs.insert(job.base.id.clone(), job);
    }

    pub fn exec_job(&self, id: &str) -> Option<Arc<JobExec>> {
        self.exec_jobs.get(id).cloned()
    }

    /// Looks up the exec job registered at a webhook `path`, as used by the
    /// `POST /karajo/api/job_exec/run/<path>` endpoint.
    pub fn exec_job_by_path(&self, path: &str) -> Option<Arc<JobExec>> {
        self.exec_jobs.values().find(|j| j.path == path).cloned()
    }

    pub fn http_job(&self, id: &str) -> Option<Arc<JobHttp>> {
        self.http_jobs.get(id).cloned()
    }

    pub fn exec_jobs(&self) -> Vec<Arc<JobExec>> {
        self.exec_jobs.values().cloned().collect()
    }

    pub fn http_jobs(&self) -> Vec<Arc<JobHttp>> {
        self.http_jobs.values().cloned().collect()
    }

    /// Replays every job's on-disk history, then spawns one run-loop task
    /// per job plus the notification dispatcher.
    pub fn start(&self) -> Result<()> {
        for job in self.exec_jobs.values() {
            job.base.replay()?;
        }
        for job in self.http_jobs.values() {
            job.base.replay()?;
        }

        let mut handles = self.handles.lock().expect("manager mutex poisoned");

        for job in self.exec_jobs.values() {
            let job = Arc::clone(job);
            handles.push(tokio::spawn(async move { job.run().await }));
        }
        for job in self.http_jobs.values() {
            let job = Arc::clone(job);
            handles.push(tokio::spawn(async move { job.run().await }));
        }

        let notif = self.notif.clone();
        let log_sink_rx = self
            .log_sink_rx
            .lock()
            .expect("manager mutex poisoned")
            .take()
            .expect("start() called more than once");
        handles.push(tokio::spawn(dispatch_notifications(log_sink_rx, notif)));

        Ok(())
    }

    /// Stops every HTTP job before every exec job, giving in-flight runs a
    /// grace period before the run-loop tasks are abandoned.
    pub async fn stop(&self) {
        for job in self.http_jobs.values() {
            job.stop();
        }
        for job in self.exec_jobs.values() {
            job.stop();
        }

        let handles = {
            let mut handles = self.handles.lock().expect("manager mutex poisoned");
            std::mem::take(&mut *handles)
        };

        let _ = tokio::time::timeout(STOP_GRACE, futures_join_all(handles)).await;
    }

    pub fn pause(&self, kind: &str, id: &str) -> Result<()> {
        match kind {
            "exec" => {
                let job = self.exec_job(id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
                job.base.pause();
                Ok(())
            }
            "http" => {
                let job = self.http_job(id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
                job.base.pause();
                Ok(())
            }
            _ => Err(Error::bad_request("unknown job kind")),
        }
    }

    pub fn resume(&self, kind: &str, id: &str) -> Result<()> {
        use crate::jobs::job_log::Status;
        match kind {
            "exec" => {
                let job = self.exec_job(id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
                job.base.resume(Status::Started);
                Ok(())
            }
            "http" => {
                let job = self.http_job(id).ok_or_else(|| Error::not_found(format!("job {id}")))?;
                job.base.resume(Status::Started);
                Ok(())
            }
            _ => Err(Error::bad_request("unknown job kind")),
        }
    }
}

/// Avoids pulling in `futures` just for `join_all`. Joins are sequential, but
/// each is already just awaiting a task that's been running independently,
/// so this adds no real latency over a concurrent join; join errors are
/// swallowed (a panicked job task should not take the whole shutdown down
/// with it).
async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn dispatch_notifications(mut rx: mpsc::Receiver<LogNotification>, notif: NotifRegistry) {
    while let Some(message) = rx.recv().await {
        for name in &message.notify {
            if let Some(client) = notif.get(name) {
                let job_id = message.job_id.clone();
                let counter = message.counter;
                let status = message.status;
                let body = message.message.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.send(&job_id, counter, status, &body).await {
                        tracing::warn!(job_id = %job_id, error = %e, "notification delivery failed");
                    }
                });
            }
        }
    }
}
