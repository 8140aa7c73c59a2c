// src/core/notifier/channel.rs

//! The channel trait every notification sink implements.

use super::Notification;
use crate::core::errors::AgentResult;
use async_trait::async_trait;

#[async_trait]
pub trait NotifyChannel: Send + Sync {
    async fn send(&self, notification: &Notification) -> AgentResult<()>;

    /// Short label used in warn logs when delivery exhausts its retries.
    fn name(&self) -> &str;
}

/// Strips CR/LF from a string before it's used in an HTTP header, SMTP
/// envelope field, or subject line — prevents header/command injection from
/// alert content that happens to contain newlines.
pub fn sanitize_line(s: &str) -> String {
    s.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}
