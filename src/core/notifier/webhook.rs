// src/core/notifier/webhook.rs

//! Webhook delivery channel: POSTs a JSON body (default or templated) to a
//! configured URL.

use super::channel::{NotifyChannel, sanitize_line};
use super::Notification;
use crate::core::errors::{AgentError, AgentResult};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub struct WebhookChannel {
    url: Url,
    headers: HashMap<String, String>,
    template: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: Url, headers: HashMap<String, String>, template: Option<String>) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .redirect(Policy::limited(3))
            .build()
            .map_err(|e| AgentError::InvalidConfig(format!("failed to build webhook client: {e}")))?;
        Ok(WebhookChannel { url, headers, template, client })
    }

    fn render_body(&self, n: &Notification) -> String {
        match &self.template {
            Some(tmpl) => tmpl
                .replace("{{Subject}}", &n.subject)
                .replace("{{Body}}", &n.body)
                .replace("{{Severity}}", &n.severity.to_string())
                .replace("{{Status}}", n.status.as_str()),
            None => serde_json::json!({ "text": format!("*{}*\n{}", n.subject, n.body) }).to_string(),
        }
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    async fn send(&self, notification: &Notification) -> AgentResult<()> {
        let body = self.render_body(notification);
        let mut request = self.client.post(self.url.clone()).body(body);

        let mut has_content_type = false;
        for (key, value) in &self.headers {
            if key.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            request = request.header(sanitize_line(key), sanitize_line(value));
        }
        if !has_content_type {
            request = request.header("content-type", "application/json");
        }

        let response = request.send().await.map_err(|e| AgentError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AgentError::Transport(format!("webhook {} returned {}", self.url, response.status())));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
