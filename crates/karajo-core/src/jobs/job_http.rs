//! `JobHttp`: fires an outbound HTTP request on schedule, interval, or
//! on-demand trigger, and scores the run by response status.

use crate::error::{Error, Result};
use crate::jobs::job_base::{JobBase, Trigger};
use crate::jobs::job_log::JobLog;
use crate::jobs::webhook_auth::hmac_sha256_hex;
use reqwest::Method;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;

/// Where `_karajo_epoch` (and the HMAC signature, if a secret is set) is
/// injected into the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Query,
    Form,
    Json,
}

impl RequestType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "form" => RequestType::Form,
            "json" => RequestType::Json,
            _ => RequestType::Query,
        }
    }
}

const TRIGGER_QUEUE_CAPACITY: usize = 1;

pub struct JobHttp {
    pub base: JobBase,
    pub method: Method,
    pub url: String,
    pub request_type: RequestType,
    pub secret: String,
    pub header_sign: String,
    /// Extra headers sent with every request, applied after the signature
    /// header so a config header can't silently displace it.
    pub headers: Vec<(String, String)>,
    /// `None` means no timeout. Resolving a job's configured `timeout`
    /// (`0` => env default, negative => `None`, positive => itself) is the
    /// caller's job; by the time it reaches here it is unambiguous.
    pub timeout: Option<StdDuration>,
    client: reqwest::Client,
    /// This karajo instance's own listen address, used to resolve a
    /// `url` that begins with `/` as a path on the local control plane.
    listen_addr: String,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
    stop_tx: mpsc::Sender<()>,
    stop_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl JobHttp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base: JobBase,
        method: Method,
        url: String,
        request_type: RequestType,
        secret: String,
        header_sign: String,
        headers: Vec<(String, String)>,
        timeout: Option<StdDuration>,
        insecure_tls: bool,
        listen_addr: String,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(Error::config("empty-url"));
        }
        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(insecure_tls);
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().map_err(Error::from)?;

        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Ok(Self {
            base,
            method,
            url,
            request_type,
            secret,
            header_sign,
            headers,
            timeout,
            client,
            listen_addr,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            stop_tx,
            stop_rx: Mutex::new(Some(stop_rx)),
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Enqueues an on-demand run, as triggered from the control plane.
    pub fn trigger(&self) -> Result<serde_json::Value> {
        self.base.can_start()?;
        self.trigger_tx
            .try_send(())
            .map_err(|_| Error::already_running(format!("job-already-run: {}", self.base.id)))?;
        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let (status, last_run, next_run) = self.base.snapshot_state();
        json!({
            "id": self.base.id,
            "name": self.base.name,
            "kind": "http",
            "status": status.as_str(),
            "last_run": last_run,
            "next_run": next_run,
            "url": self.url,
        })
    }

    pub async fn run(self: std::sync::Arc<Self>) {
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
                None => std::time::Duration::from_secs(u64::MAX / 2),
            };

            tokio::select! {
                biased;
                _ = tokio::time::sleep(wait), if self.base.trigger.is_some() => {
                    self.fire().await;
                }
                maybe = trigger_rx.recv() => {
                    match maybe {
                        Some(()) => self.fire().await,
                        None => break,
                    }
                }
                _ = stop_rx.recv() => break,
            }
        }
    }

    async fn fire(&self) {
        if self.base.can_start().is_err() {
            let log = self.base.new_log();
            let _ = self.base.finish(log, None);
            return;
        }

        let _permit = self.base.gate.acquire().await;
        let mut log = self.base.new_log();
        let result = self.execute(&mut log).await;
        drop(_permit);
        let _ = self.base.finish(log, result.err());
    }

    fn resolve_url(&self) -> String {
        if self.url.starts_with('/') {
            format!("{}{}", self.listen_addr.trim_end_matches('/'), self.url)
        } else {
            self.url.clone()
        }
    }

    async fn execute(&self, log: &mut JobLog) -> Result<()> {
        log.write_line("=== BEGIN");

        let url = self.resolve_url();
        let epoch = self.base.now().timestamp();
        let mut request = self.client.request(self.method.clone(), &url);

        request = match self.request_type {
            RequestType::Query => request.query(&[("_karajo_epoch", epoch.to_string())]),
            RequestType::Form => request.form(&[("_karajo_epoch", epoch.to_string())]),
            RequestType::Json => request.json(&json!({ "_karajo_epoch": epoch })),
        };

        for (k, v) in &self.headers {
            request = request.header(k, v);
        }

        let mut sign_header = None;
        if !self.secret.is_empty() {
            let body = match self.request_type {
                RequestType::Query | RequestType::Form => format!("_karajo_epoch={epoch}"),
                RequestType::Json => json!({ "_karajo_epoch": epoch }).to_string(),
            };
            let sig = hmac_sha256_hex(&self.secret, body.as_bytes());
            request = request.header(&self.header_sign, sig.clone());
            sign_header = Some(sig);
        }

        log.write_line(&format!("--> {} {url}", self.method));
        for (k, v) in &self.headers {
            log.write_line(&format!("{k}: {v}"));
        }
        if let Some(sig) = &sign_header {
            log.write_line(&format!("{}: {sig}", self.header_sign));
        }

        let response = request.send().await.map_err(Error::from)?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        log.write_line(&format!("<-- {status}"));
        for (name, value) in &response_headers {
            log.write_line(&format!("{}: {}", name, value.to_str().unwrap_or("<binary>")));
        }
        if !body.is_empty() {
            log.write_line(&body);
        }

        if status.as_u16() == 200 {
            Ok(())
        } else {
            Err(Error::internal(format!("unexpected response status {status}")))
        }
    }
}
