//! Wires a loaded [`Env`] into a running [`Manager`]: turns each
//! `ExecJobConfig`/`HttpJobConfig` into a live `JobExec`/`JobHttp` bound to
//! the manager's shared gate and notification sink, and registers every
//! configured notification client.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use reqwest::Method;

use crate::env::{Env, ExecJobConfig, HttpJobConfig};
use crate::error::{Error, Result};
use crate::jobs::job_base::{self, JobBase, Trigger};
use crate::jobs::job_exec::{Execution, JobExec};
use crate::jobs::job_http::{JobHttp, RequestType};
use crate::jobs::job_log::JobKind;
use crate::jobs::scheduler::CalendarSchedule;
use crate::jobs::webhook_auth::AuthKind;
use crate::manager::Manager;
use crate::notification::{NotifRegistry, WebhookNotifClient};
use crate::time::{Clock, SystemClock};

/// Builds a [`Manager`] with every job from `env` registered but not yet
/// started; call [`Manager::start`] to replay history and spawn run loops.
pub fn build_manager(env: &Env) -> Result<Manager> {
    let mut notif_registry = NotifRegistry::new();
    for notif in &env.notifs {
        notif_registry.register(Arc::new(WebhookNotifClient::new(notif.name.clone(), notif.url.clone())));
    }

    let (mut manager, notif_tx) = Manager::new(env.max_job_running, notif_registry);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    for cfg in &env.exec_jobs {
        let job = build_exec_job(env, cfg, &manager, &notif_tx, Arc::clone(&clock))?;
        manager.add_exec_job(Arc::new(job));
    }
    for cfg in &env.http_jobs {
        let job = build_http_job(env, cfg, &manager, &notif_tx, Arc::clone(&clock))?;
        manager.add_http_job(Arc::new(job));
    }

    Ok(manager)
}

fn build_trigger(schedule: Option<&str>, interval_secs: Option<i64>) -> Result<Option<Trigger>> {
    // Invariant 6: schedule and interval are mutually exclusive; schedule wins.
    if let Some(expr) = schedule {
        return Ok(Some(Trigger::Schedule(CalendarSchedule::parse(expr)?)));
    }
    if let Some(secs) = interval_secs {
        let raw = Duration::seconds(secs.max(0));
        return Ok(Some(Trigger::Interval(JobBase::computed_interval(raw))));
    }
    Ok(None)
}

fn build_exec_job(
    env: &Env,
    cfg: &ExecJobConfig,
    manager: &Manager,
    notif_tx: &tokio::sync::mpsc::Sender<job_base::LogNotification>,
    clock: Arc<dyn Clock>,
) -> Result<JobExec> {
    let id = job_base::normalize(&cfg.name);
    let (dir_work, dir_log) = env.materialize_job_dirs("exec", &id)?;
    let trigger = build_trigger(cfg.schedule.as_deref(), cfg.interval_secs)?;

    let base = JobBase::new(
        &cfg.name,
        JobKind::Exec,
        &cfg.description,
        trigger,
        cfg.log_retention,
        cfg.notif_on_success.clone(),
        cfg.notif_on_failed.clone(),
        dir_work,
        dir_log,
        manager.gate.clone(),
        Some(notif_tx.clone()),
        clock,
    );

    let auth_kind = AuthKind::parse(&cfg.auth_kind);
    let secret = if cfg.secret.is_empty() { env.secret.clone() } else { cfg.secret.clone() };

    JobExec::new(base, cfg.path.clone(), auth_kind, cfg.header_sign.clone(), secret, Execution::Commands(cfg.commands.clone()))
}

fn build_http_job(
    env: &Env,
    cfg: &HttpJobConfig,
    manager: &Manager,
    notif_tx: &tokio::sync::mpsc::Sender<job_base::LogNotification>,
    clock: Arc<dyn Clock>,
) -> Result<JobHttp> {
    let id = job_base::normalize(&cfg.name);
    let (dir_work, dir_log) = env.materialize_job_dirs("http", &id)?;
    let trigger = build_trigger(cfg.schedule.as_deref(), cfg.interval_secs)?;

    let base = JobBase::new(
        &cfg.name,
        JobKind::Http,
        &cfg.description,
        trigger,
        cfg.log_retention,
        cfg.notif_on_success.clone(),
        cfg.notif_on_failed.clone(),
        dir_work,
        dir_log,
        manager.gate.clone(),
        Some(notif_tx.clone()),
        clock,
    );

    let method = parse_method(&cfg.method)?;
    let request_type = RequestType::parse(&cfg.request_type);
    let secret = if cfg.secret.is_empty() { env.secret.clone() } else { cfg.secret.clone() };

    // 0 => env default, negative => no timeout, positive => itself.
    let timeout = if cfg.timeout_secs == 0 {
        Some(StdDuration::from_secs(env.http_default_timeout_secs.max(0) as u64))
    } else if cfg.timeout_secs < 0 {
        None
    } else {
        Some(StdDuration::from_secs(cfg.timeout_secs as u64))
    };

    JobHttp::new(
        base,
        method,
        cfg.url.clone(),
        request_type,
        secret,
        cfg.header_sign.clone(),
        cfg.headers.clone(),
        timeout,
        cfg.insecure_tls,
        env.listen_address.clone(),
    )
}

/// Describes an in-process callback job: the programmatic counterpart to a
/// `[job "<name>"]` section's `command = ...` lines. INI has no way to
/// encode a Rust closure, so a `call`-driven exec job is registered directly
/// against a running [`Manager`] instead of through [`Env`]/`build_manager`.
pub struct CallJobConfig {
    pub name: String,
    pub description: String,
    pub schedule: Option<String>,
    pub interval_secs: Option<i64>,
    pub path: String,
    pub auth_kind: String,
    pub header_sign: String,
    pub secret: String,
    pub log_retention: usize,
    pub notif_on_success: Vec<String>,
    pub notif_on_failed: Vec<String>,
}

/// Builds a `call`-backed `JobExec` from `cfg` and `handler`, and registers
/// it on `manager`. Must be called before `Manager::start` so the job's
/// history replay and run loop pick it up like any file-configured job.
pub fn register_call_job(
    env: &Env,
    manager: &mut Manager,
    cfg: CallJobConfig,
    handler: crate::jobs::job_exec::CallHandler,
) -> Result<()> {
    let id = job_base::normalize(&cfg.name);
    let (dir_work, dir_log) = env.materialize_job_dirs("exec", &id)?;
    let trigger = build_trigger(cfg.schedule.as_deref(), cfg.interval_secs)?;

    let base = JobBase::new(
        &cfg.name,
        JobKind::Exec,
        &cfg.description,
        trigger,
        cfg.log_retention,
        cfg.notif_on_success,
        cfg.notif_on_failed,
        dir_work,
        dir_log,
        manager.gate.clone(),
        Some(manager.log_sink()),
        Arc::new(SystemClock),
    );

    let auth_kind = AuthKind::parse(&cfg.auth_kind);
    let secret = if cfg.secret.is_empty() { env.secret.clone() } else { cfg.secret };

    let job = JobExec::new(base, cfg.path, auth_kind, cfg.header_sign, secret, Execution::Call(handler))?;
    manager.add_exec_job(Arc::new(job));
    Ok(())
}

fn parse_method(s: &str) -> Result<Method> {
    match s.trim().to_ascii_uppercase().as_str() {
        "" | "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        other => Err(Error::config(format!("unsupported HTTP method: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(dir: &std::path::Path, contents: &str) -> String {
        let path = dir.join("karajo.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn builds_one_job_per_config_section_and_materializes_dirs() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080
max_job_running = 2
secret = topsecret

[job "backup"]
schedule = daily@02:00
command = /usr/bin/backup.sh

[job.http "ping"]
interval = 300
url = https://example.com/ping
"#,
        );
        let env = Env::load(&path).unwrap();
        let manager = build_manager(&env).unwrap();

        assert!(manager.exec_job("backup").is_some());
        assert!(manager.http_job("ping").is_some());
        assert!(env.job_work_dir("exec", "backup").exists());
        assert!(env.job_log_dir("exec", "backup").exists());
    }

    #[test]
    fn job_secret_falls_back_to_env_default() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
secret = fallback-secret

[job "backup"]
command = /usr/bin/backup.sh
"#,
        );
        let env = Env::load(&path).unwrap();
        let manager = build_manager(&env).unwrap();
        let job = manager.exec_job("backup").unwrap();
        assert_eq!(job.secret, "fallback-secret");
    }

    #[test]
    fn unsupported_http_method_is_rejected() {
        assert!(parse_method("PATCH").is_err());
        assert!(matches!(parse_method(""), Ok(Method::GET)));
    }

    #[test]
    fn register_call_job_wires_a_callback_driven_exec_job() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[karajo]
listen_address = 127.0.0.1:8080
secret = topsecret
"#,
        );
        let env = Env::load(&path).unwrap();
        let mut manager = build_manager(&env).unwrap();

        let handler: crate::jobs::job_exec::CallHandler = Arc::new(|log, _req| {
            log.write_line("ran in-process");
            Ok(())
        });

        register_call_job(
            &env,
            &mut manager,
            CallJobConfig {
                name: "in-process".into(),
                description: "".into(),
                schedule: None,
                interval_secs: None,
                path: "/hooks/in-process".into(),
                auth_kind: "".into(),
                header_sign: "X-Karajo-Sign".into(),
                secret: "".into(),
                log_retention: 5,
                notif_on_success: vec![],
                notif_on_failed: vec![],
            },
            handler,
        )
        .unwrap();

        let job = manager.exec_job("in-process").unwrap();
        assert_eq!(job.secret, "topsecret");
        assert!(job.trigger_manual().is_ok());
    }
}
