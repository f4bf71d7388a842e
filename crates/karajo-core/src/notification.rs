//! Notification clients: one named sink per `[notif "<name>"]` config
//! section, invoked fire-and-forget whenever a job run reaches success or
//! failure and lists that name in its `notifOnSuccess`/`notifOnFailed`.

use crate::error::Result;
use crate::jobs::job_log::Status;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// A single destination a job's run outcome can be announced to.
#[async_trait]
pub trait NotifClient: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, job_id: &str, counter: i64, status: Status, message: &str) -> Result<()>;
}

/// Posts a small JSON envelope to a configured URL. Grounded in the same
/// "fire the outcome at a webhook URL" shape used by the control plane's own
/// inbound webhook handling, just outbound instead of inbound.
pub struct WebhookNotifClient {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifClient {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with a static timeout"),
        }
    }
}

#[async_trait]
impl NotifClient for WebhookNotifClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, job_id: &str, counter: i64, status: Status, message: &str) -> Result<()> {
        let body = json!({
            "job_id": job_id,
            "counter": counter,
            "status": status.as_str(),
            "message": message,
        });
        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            tracing::warn!(
                notif = %self.name,
                status = %response.status(),
                "notification client received a non-2xx response"
            );
        }
        Ok(())
    }
}

/// A named collection of registered clients, looked up by the names a job
/// lists in `notifOnSuccess`/`notifOnFailed`.
#[derive(Default, Clone)]
pub struct NotifRegistry {
    clients: std::collections::HashMap<String, Arc<dyn NotifClient>>,
}

impl NotifRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn NotifClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NotifClient>> {
        self.clients.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn webhook_client_posts_json_envelope() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = WebhookNotifClient::new("ops", server.uri());
        let result = client.send("job-1", 3, Status::Success, "ok").await;
        assert!(result.is_ok());
    }

    #[test]
    fn registry_looks_up_by_name() {
        let mut registry = NotifRegistry::new();
        registry.register(Arc::new(WebhookNotifClient::new("ops", "http://example.invalid")));
        assert!(registry.get("ops").is_some());
        assert!(registry.get("missing").is_none());
    }
}
