use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::config::SmtpSettings;

use super::traits::BaseEmailService;

/// SMTP email service (lettre).
///
/// Built unconditionally; when no SMTP host is configured, sends fail with
/// a clear error that the dispatcher records in the ledger.
pub struct SmtpEmailService {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpEmailService {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let from: Mailbox = settings
            .from_address
            .parse()
            .context("SMTP_FROM is not a valid mailbox")?;

        let transport = match &settings.host {
            Some(host) => {
                let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .context("failed to build SMTP transport")?
                    .port(settings.port);
                if let (Some(username), Some(password)) =
                    (&settings.username, &settings.password)
                {
                    builder =
                        builder.credentials(Credentials::new(username.clone(), password.clone()));
                }
                Some(builder.build())
            }
            None => None,
        };

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl BaseEmailService for SmtpEmailService {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP transport not configured"))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().context("invalid recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        transport
            .send(message)
            .await
            .context("SMTP send failed")?;

        debug!(to = %to, subject = %subject, "email sent");
        Ok(())
    }
}
