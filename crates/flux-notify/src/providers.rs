use crate::transport::{MailTransport, OutgoingMail, SendOutcome};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use flux_config::SmtpConfig;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

// ============================================================================
// SMTP 邮件
// ============================================================================

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    domain: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, from: &str) -> Result<Self> {
        let from: Mailbox = from.parse()?;
        let domain = from.email.domain().to_string();

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        info!(host = %config.host, port = config.port, "SMTP mailer configured");

        Ok(Self {
            transport: builder.build(),
            from,
            domain,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<SendOutcome> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| anyhow!("invalid recipient {}: {}", mail.to, e))?;
        let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), self.domain);

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.as_str())
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(
                mail.text.clone(),
                mail.html.clone(),
            ))?;

        match self.transport.send(email).await {
            Ok(_) => Ok(SendOutcome::delivered(message_id)),
            Err(e) => Ok(SendOutcome::failure(format!("Email send failed: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

// ============================================================================
// 仅记录日志（未配置 SMTP 时使用）
// ============================================================================

#[derive(Default)]
pub struct LogMailer;

impl LogMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MailTransport for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<SendOutcome> {
        let message_id = format!("<{}@flux.local>", uuid::Uuid::new_v4());
        info!(
            to = %mail.to,
            subject = %mail.subject,
            message_id = %message_id,
            "Email not sent (log-only transport)"
        );
        debug!(body = %mail.text, "Log-only email body");
        Ok(SendOutcome::delivered(message_id))
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_mailer_reports_delivery() {
        let mailer = LogMailer::new();
        let outcome = mailer
            .send(&OutgoingMail {
                to: "a@x.com".to_string(),
                subject: "subject".to_string(),
                html: "<p>body</p>".to_string(),
                text: "body".to_string(),
            })
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.message_id.unwrap().ends_with("@flux.local>"));
    }

    #[test]
    fn test_smtp_mailer_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
        };
        assert!(SmtpMailer::new(&config, "not an address").is_err());
    }
}
