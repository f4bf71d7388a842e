//! `JobExec`: runs a chain of shell commands or an in-process callback,
//! triggered by schedule, interval, or inbound webhook.

use crate::error::{Error, Result};
use crate::jobs::job_base::{JobBase, Trigger};
use crate::jobs::job_log::JobLog;
use crate::jobs::webhook_auth::{self, AuthKind, Headers};
use serde_json::json;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// An inbound webhook request handed to the run loop or to an in-process
/// `call` handler. `None` is passed for timer/scheduler-driven runs.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: Headers,
    pub body: Vec<u8>,
}

pub type CallHandler = Arc<dyn Fn(&mut JobLog, Option<&WebhookRequest>) -> Result<()> + Send + Sync>;

pub enum Execution {
    Commands(Vec<String>),
    Call(CallHandler),
}

/// Admission queue capacity for inbound webhook triggers: a single slot, so
/// a second concurrent arrival is rejected rather than queued indefinitely.
const TRIGGER_QUEUE_CAPACITY: usize = 1;

pub struct JobExec {
    pub base: JobBase,
    pub path: String,
    pub auth_kind: AuthKind,
    pub header_sign: String,
    pub secret: String,
    execution: Execution,
    trigger_tx: mpsc::Sender<WebhookRequest>,
    trigger_rx: Mutex<Option<mpsc::Receiver<WebhookRequest>>>,
    stop_tx: mpsc::Sender<()>,
    stop_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl JobExec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base: JobBase,
        path: String,
        auth_kind: AuthKind,
        header_sign: String,
        secret: String,
        execution: Execution,
    ) -> Result<Self> {
        if matches!(&execution, Execution::Commands(c) if c.is_empty()) {
            return Err(Error::config("empty-commands-or-call"));
        }
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Ok(Self {
            base,
            path,
            auth_kind,
            header_sign,
            secret,
            execution,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            stop_tx,
            stop_rx: Mutex::new(Some(stop_rx)),
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Verifies authorization, checks `canStart`, and enqueues the request.
    /// Returns the job snapshot on success.
    pub fn trigger_webhook(&self, headers: &Headers, body: Vec<u8>) -> Result<serde_json::Value> {
        webhook_auth::verify(self.auth_kind, headers, &body, &self.secret, &self.header_sign)?;
        self.enqueue(WebhookRequest { headers: headers.clone(), body })
    }

    /// Manual control-plane trigger: authorization here is the caller's
    /// session cookie, not the job's own webhook scheme, so this skips
    /// `webhook_auth::verify` entirely rather than faking a signature that
    /// would only satisfy the `hmac-sha256` auth kind.
    pub fn trigger_manual(&self) -> Result<serde_json::Value> {
        self.enqueue(WebhookRequest { headers: Headers::new(), body: Vec::new() })
    }

    fn enqueue(&self, req: WebhookRequest) -> Result<serde_json::Value> {
        self.base.can_start()?;
        self.trigger_tx
            .try_send(req)
            .map_err(|_| Error::already_running(format!("job-already-run: {}", self.base.id)))?;

        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let (status, last_run, next_run) = self.base.snapshot_state();
        json!({
            "id": self.base.id,
            "name": self.base.name,
            "kind": "exec",
            "status": status.as_str(),
            "last_run": last_run,
            "next_run": next_run,
            "path": self.path,
        })
    }

    /// Runs the job's select loop until `stop()` is called. Intended to be
    /// spawned once as its own task per job.
    pub async fn run(self: Arc<Self>) {
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .expect("job mutex poisoned")
            .take()
            .expect("run() called more than once");
        let mut stop_rx = self
            .stop_rx
            .lock()
            .expect("job mutex poisoned")
            .take()
            .expect("run() called more than once");

        loop {
            let wait = match &self.base.trigger {
                Some(Trigger::Schedule(sched)) => {
                    let now = self.base.now();
                    let next = sched.next_fire(now);
                    (next - now).to_std().unwrap_or(std::time::Duration::from_secs(0))
                }
                Some(Trigger::Interval(interval)) => {
                    let now = self.base.now();
                    let last_run = self.base.last_run().unwrap_or(now);
                    let target = last_run + *interval;
                    if target <= now {
                        std::time::Duration::from_secs(0)
                    } else {
                        (target - now).to_std().unwrap_or(std::time::Duration::from_secs(0))
                    }
                }
                // Webhook-only mode: wait only on the trigger queue or stop.
                None => std::time::Duration::from_secs(u64::MAX / 2),
            };

            tokio::select! {
                biased;
                _ = tokio::time::sleep(wait), if self.base.trigger.is_some() => {
                    self.fire(None).await;
                }
                maybe_req = trigger_rx.recv() => {
                    match maybe_req {
                        Some(req) => self.fire(Some(req)).await,
                        None => break,
                    }
                }
                _ = stop_rx.recv() => break,
            }
        }
    }

    async fn fire(&self, req: Option<WebhookRequest>) {
        if self.base.can_start().is_err() {
            // A skipped/paused run still produces a flushed `paused` log.
            let log = self.base.new_log();
            let _ = self.base.finish(log, None);
            return;
        }

        let _permit = self.base.gate.acquire().await;
        let mut log = self.base.new_log();
        let result = self.execute(&mut log, req.as_ref()).await;
        drop(_permit);
        let _ = self.base.finish(log, result.err());
    }

    async fn execute(&self, log: &mut JobLog, req: Option<&WebhookRequest>) -> Result<()> {
        log.write_line("=== BEGIN");

        let result = match &self.execution {
            Execution::Call(handler) => handler(log, req),
            Execution::Commands(commands) => self.run_commands(log, commands).await,
        };

        match &result {
            Ok(()) => log.write_line("=== DONE"),
            Err(e) => log.write_line(&format!("=== FAILED: {e}")),
        }
        result
    }

    async fn run_commands(&self, log: &mut JobLog, commands: &[String]) -> Result<()> {
        let counter = log.counter;
        let path_env = std::env::var("PATH").unwrap_or_default();

        for command in commands {
            let mut child = Command::new("/bin/sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.base.dir_work)
                .env_clear()
                .env("PATH", &path_env)
                .env("KARAJO_JOB_COUNTER", counter.to_string())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(Error::from)?;

            let stdout = child.stdout.take().expect("stdout piped");
            let stderr = child.stderr.take().expect("stderr piped");
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();

            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        match line.map_err(Error::from)? {
                            Some(l) => log.write_line(&l),
                            None => break,
                        }
                    }
                    line = stderr_lines.next_line() => {
                        match line.map_err(Error::from)? {
                            Some(l) => log.write_line(&l),
                            None => {}
                        }
                    }
                }
            }
            while let Some(l) = stderr_lines.next_line().await.map_err(Error::from)? {
                log.write_line(&l);
            }

            let status = child.wait().await.map_err(Error::from)?;
            if !status.success() {
                return Err(Error::internal(format!(
                    "command `{command}` exited with {status}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::gate::Gate;
    use crate::jobs::job_log::JobKind;
    use crate::time::SystemClock;
    use tempfile::tempdir;

    fn new_exec(dir: &std::path::Path, execution: Execution) -> JobExec {
        let base = JobBase::new(
            "test-exec",
            JobKind::Exec,
            "",
            None,
            5,
            vec![],
            vec![],
            dir.join("work"),
            dir.join("log"),
            Gate::new(1),
            None,
            Arc::new(SystemClock),
        );
        JobExec::new(base, "/run/test".into(), AuthKind::HmacSha256, "X-Karajo-Sign".into(), "s3cret".into(), execution)
            .unwrap()
    }

    #[test]
    fn init_fails_without_commands_or_call() {
        let dir = tempdir().unwrap();
        let base = JobBase::new(
            "no-op",
            JobKind::Exec,
            "",
            None,
            5,
            vec![],
            vec![],
            dir.path().join("work"),
            dir.path().join("log"),
            Gate::new(1),
            None,
            Arc::new(SystemClock),
        );
        let result = JobExec::new(base, "/x".into(), AuthKind::HmacSha256, "X-Karajo-Sign".into(), "s".into(), Execution::Commands(vec![]));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_commands_executes_in_sequence() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let job = new_exec(dir.path(), Execution::Commands(vec!["echo one".into(), "echo two".into()]));
        let mut log = job.base.new_log();
        job.run_commands(&mut log, &["echo one".into(), "echo two".into()]).await.unwrap();
        let text = String::from_utf8(log.contents().to_vec()).unwrap();
        assert!(text.contains("one"));
        assert!(text.contains("two"));
    }

    #[tokio::test]
    async fn first_nonzero_exit_aborts_chain() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let job = new_exec(dir.path(), Execution::Commands(vec!["exit 1".into(), "echo should-not-run".into()]));
        let mut log = job.base.new_log();
        let result = job.run_commands(&mut log, &["exit 1".into(), "echo should-not-run".into()]).await;
        assert!(result.is_err());
        let text = String::from_utf8(log.contents().to_vec()).unwrap();
        assert!(!text.contains("should-not-run"));
    }

    #[test]
    fn webhook_trigger_rejects_when_queue_is_full() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let job = new_exec(dir.path(), Execution::Commands(vec!["true".into()]));
        let body = b"_karajo_sign=123".to_vec();
        let sig = webhook_auth::hmac_sha256_hex("s3cret", &body);
        let mut headers = Headers::new();
        headers.insert("X-Karajo-Sign".into(), sig.clone());

        let first = job.trigger_webhook(&headers, body.clone());
        assert!(first.is_ok());

        headers.insert("X-Karajo-Sign".into(), sig);
        let second = job.trigger_webhook(&headers, body);
        assert!(matches!(second, Err(Error::AlreadyRunning(_))));
    }

    #[test]
    fn manual_trigger_bypasses_webhook_auth_scheme() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let base = JobBase::new(
            "gh-job",
            JobKind::Exec,
            "",
            None,
            5,
            vec![],
            vec![],
            dir.path().join("work"),
            dir.path().join("log"),
            Gate::new(1),
            None,
            Arc::new(SystemClock),
        );
        // A github-authed job has no hmac-sha256 header at all; a manual
        // trigger must not require one.
        let job = JobExec::new(base, "/run/gh".into(), AuthKind::Github, "X-Karajo-Sign".into(), "s3cret".into(), Execution::Commands(vec!["true".into()]))
            .unwrap();
        assert!(job.trigger_manual().is_ok());
    }

    #[tokio::test]
    async fn call_handler_runs_in_place_of_a_command_chain() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();

        let seen_counter = Arc::new(AtomicUsize::new(0));
        let handler_seen = Arc::clone(&seen_counter);
        let handler: CallHandler = Arc::new(move |log, req| {
            handler_seen.store(log.counter as usize, Ordering::SeqCst);
            log.write_line(if req.is_some() { "webhook-driven" } else { "timer-driven" });
            Ok(())
        });

        let job = new_exec(dir.path(), Execution::Call(handler));
        let mut log = job.base.new_log();
        let result = job.execute(&mut log, None).await;
        assert!(result.is_ok());
        assert_eq!(seen_counter.load(Ordering::SeqCst), log.counter as usize);
        let text = String::from_utf8(log.contents().to_vec()).unwrap();
        assert!(text.contains("timer-driven"));
    }

    #[tokio::test]
    async fn call_handler_sees_the_inbound_webhook_request() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();

        let handler: CallHandler = Arc::new(|log, req| {
            log.write_line(if req.is_some() { "webhook-driven" } else { "timer-driven" });
            Ok(())
        });

        let job = new_exec(dir.path(), Execution::Call(handler));
        let mut log = job.base.new_log();
        let req = WebhookRequest { headers: Headers::new(), body: b"{}".to_vec() };
        job.execute(&mut log, Some(&req)).await.unwrap();
        let text = String::from_utf8(log.contents().to_vec()).unwrap();
        assert!(text.contains("webhook-driven"));
    }

    #[test]
    fn webhook_trigger_rejects_bad_signature() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log")).unwrap();
        let job = new_exec(dir.path(), Execution::Commands(vec!["true".into()]));
        let mut headers = Headers::new();
        headers.insert("X-Karajo-Sign".into(), "deadbeef".into());
        let result = job.trigger_webhook(&headers, b"body".to_vec());
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }
}
