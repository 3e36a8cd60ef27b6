/// Email sending functionality
use crate::{
    config::EmailConfig,
    error::{PadlockError, PadlockResult},
};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Outbound mail transport
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> PadlockResult<()>;
}

/// Build the sender described by the configuration. Without a mail server
/// emails are written to the log instead of being delivered.
pub fn from_config(config: &EmailConfig) -> PadlockResult<Arc<dyn Sender>> {
    match &config.server {
        Some(_) => Ok(Arc::new(SmtpSender::new(config)?)),
        None => {
            tracing::warn!("Email server not configured, emails will only be logged");
            Ok(Arc::new(LogSender))
        }
    }
}

/// SMTP mailer
#[derive(Clone)]
pub struct SmtpSender {
    from: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    pub fn new(config: &EmailConfig) -> PadlockResult<Self> {
        let host = config
            .server
            .as_deref()
            .ok_or_else(|| PadlockError::Server("SMTP server not configured".to_string()))?;

        // Port 465 speaks TLS right away, anything else upgrades via STARTTLS
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| PadlockError::Server(format!("SMTP setup failed: {}", e)))?
        .port(config.port);

        let builder = match (&config.user, &config.password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            from: config.from_address(),
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> PadlockResult<()> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| PadlockError::Server(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| PadlockError::BadRequest(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| PadlockError::Server(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| PadlockError::Server(format!("Failed to send email: {}", e)))?;

        tracing::info!("Sent email to {}: {}", to, subject);
        Ok(())
    }
}

/// Sender that only logs, used when no mail server is configured
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> PadlockResult<()> {
        tracing::warn!(to, subject, "Email not delivered (no mail server):\n{}", body);
        Ok(())
    }
}

/// A message captured by [`RecordingSender`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sender keeping every message in memory, for tests and local development
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().clone()
    }

    pub fn last_to(&self, to: &str) -> Option<SentEmail> {
        self.sent.lock().iter().rev().find(|m| m.to == to).cloned()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> PadlockResult<()> {
        self.sent.lock().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Send an email on a background task. Failures are logged, never returned.
pub fn send_in_background(
    sender: Arc<dyn Sender>,
    to: String,
    subject: String,
    body: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sender.send(&to, &subject, &body).await {
            tracing::error!(to = %to, "Failed to send email '{}': {}", subject, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sender() {
        let sender = RecordingSender::new();
        sender.send("a@example.com", "one", "1").await.unwrap();
        sender.send("b@example.com", "two", "2").await.unwrap();
        sender.send("a@example.com", "three", "3").await.unwrap();

        assert_eq!(sender.sent().len(), 3);
        assert_eq!(sender.last_to("a@example.com").unwrap().subject, "three");
        assert!(sender.last_to("c@example.com").is_none());
    }

    #[tokio::test]
    async fn test_background_send() {
        let sender = Arc::new(RecordingSender::new());
        send_in_background(
            sender.clone(),
            "a@example.com".to_string(),
            "hello".to_string(),
            "body".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(sender.sent().len(), 1);
    }

    #[test]
    fn test_unconfigured_email_logs() {
        let config = EmailConfig::default();
        assert!(from_config(&config).is_ok());
    }
}
