// src/core/notifier/smtp.rs

//! SMTP delivery channel, grounded on the pack's mail-plus-embedded-store
//! pairing (`openobserve-openobserve`'s `lettre` usage).

use super::channel::{NotifyChannel, sanitize_line};
use super::Notification;
use crate::core::errors::{AgentError, AgentResult};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpChannel {
    pub fn new(host: &str, port: u16, from: &str, to: &[String]) -> AgentResult<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        let from: Mailbox = sanitize_line(from)
            .parse()
            .map_err(|e| AgentError::InvalidConfig(format!("invalid notify.email.from {from:?}: {e}")))?;
        let to = to
            .iter()
            .map(|addr| {
                sanitize_line(addr)
                    .parse::<Mailbox>()
                    .map_err(|e| AgentError::InvalidConfig(format!("invalid notify.email.to {addr:?}: {e}")))
            })
            .collect::<AgentResult<Vec<_>>>()?;
        if to.is_empty() {
            return Err(AgentError::InvalidConfig("notify.email requires at least one 'to' address".to_string()));
        }

        Ok(SmtpChannel { transport, from, to })
    }
}

#[async_trait]
impl NotifyChannel for SmtpChannel {
    async fn send(&self, notification: &Notification) -> AgentResult<()> {
        let subject = sanitize_line(&notification.subject);
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        let message = builder
            .body(notification.body.clone())
            .map_err(|e| AgentError::Transport(format!("failed to build email: {e}")))?;

        self.transport.send(message).await.map_err(|e| AgentError::Transport(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "smtp"
    }
}
