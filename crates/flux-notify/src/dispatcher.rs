use crate::rate_limit::RateLimiter;
use crate::template::{NotificationKind, TemplateSet};
use crate::transport::{MailTransport, OutgoingMail, SendOutcome};
use chrono::Utc;
use flux_core::{bounded, FluxError, Filter, Page, Query, Repository, Result, SortDirection};
use flux_types::{extract_emails, Alert, AlertSeverity, AlertStatus, DeliveryStatus, EmailLog};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 投递日志查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailLogQuery {
    pub alert_id: Option<u64>,
    pub recipient: Option<String>,
    pub status: Option<DeliveryStatus>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// 通知分发器
///
/// 对每个收件人：限流检查 → 渲染模板 → 发送 → 写投递日志。
/// 收件人之间相互独立，一个失败不影响其他收件人。
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    rate_limiter: Arc<RateLimiter>,
    templates: Arc<TemplateSet>,
    email_logs: Repository<EmailLog>,
    mail_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        rate_limiter: Arc<RateLimiter>,
        templates: TemplateSet,
        email_logs: Repository<EmailLog>,
        mail_timeout: Duration,
    ) -> Self {
        info!(transport = transport.name(), "Notification dispatcher created");
        Self {
            transport,
            rate_limiter,
            templates: Arc::new(templates),
            email_logs,
            mail_timeout,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// 向所有收件人发送通知，返回每个收件人的投递记录
    pub async fn dispatch(
        &self,
        alert: &Alert,
        recipients: &[String],
        kind: NotificationKind,
    ) -> Vec<EmailLog> {
        let alert_key = match kind {
            NotificationKind::Alert => Some(alert.id.to_string()),
            NotificationKind::Resolved => Some(format!("{}:resolved", alert.id)),
            NotificationKind::Test => None,
        };
        let is_test = kind == NotificationKind::Test;

        let deliveries = recipients.iter().map(|recipient| {
            self.deliver(alert, recipient, kind, alert_key.as_deref(), is_test)
        });
        let logs = join_all(deliveries).await;

        let sent = logs
            .iter()
            .filter(|log| log.status == DeliveryStatus::Sent)
            .count();
        info!(
            alert_id = alert.id,
            recipients = recipients.len(),
            sent = sent,
            "Notification dispatched"
        );
        logs
    }

    /// 发送测试邮件
    pub async fn send_test_email(&self, recipient: &str) -> Result<EmailLog> {
        let recipient = recipient.trim();
        if extract_emails(recipient).first().map(String::as_str) != Some(recipient) {
            return Err(FluxError::Validation(format!(
                "invalid email address: {}",
                recipient
            )));
        }

        let now = Utc::now();
        let alert = Alert {
            id: 0,
            title: "Test email".to_string(),
            message: "This is a test notification from the FLUX alerting pipeline.".to_string(),
            severity: AlertSeverity::Info,
            status: AlertStatus::Active,
            source: "test".to_string(),
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
        };

        Ok(self
            .deliver(&alert, recipient, NotificationKind::Test, None, true)
            .await)
    }

    /// 查询投递日志（按 ID 倒序）
    pub async fn email_logs(&self, query: EmailLogQuery) -> Result<Page<EmailLog>> {
        let mut q = Query::new().sort_by("id", SortDirection::Desc).offset(query.offset);
        if let Some(alert_id) = query.alert_id {
            q = q.filter(Filter::eq("alert_id", alert_id));
        }
        if let Some(recipient) = query.recipient {
            q = q.filter(Filter::eq("recipient", recipient.trim().to_lowercase()));
        }
        if let Some(status) = query.status {
            q = q.filter(Filter::eq("status", status.to_string()));
        }
        if let Some(limit) = query.limit {
            q = q.limit(limit);
        }
        self.email_logs.query(&q).await
    }

    async fn deliver(
        &self,
        alert: &Alert,
        recipient: &str,
        kind: NotificationKind,
        alert_key: Option<&str>,
        is_test: bool,
    ) -> EmailLog {
        let now = Utc::now();
        let rendered = self.templates.render(kind, alert, now);
        let recipient = recipient.trim().to_lowercase();

        let mut log = EmailLog {
            id: 0,
            alert_id: (kind != NotificationKind::Test).then_some(alert.id),
            recipient: recipient.clone(),
            subject: rendered.subject.clone(),
            status: DeliveryStatus::Pending,
            error_message: None,
            message_id: None,
            sent_at: None,
            created_at: now,
        };

        let decision = self
            .rate_limiter
            .can_send_email(&recipient, alert_key, is_test);

        if !decision.allowed {
            log.status = DeliveryStatus::Failed;
            log.error_message = decision.reason;
        } else {
            let mail = OutgoingMail {
                to: recipient.clone(),
                subject: rendered.subject,
                html: rendered.html,
                text: rendered.text,
            };
            let op = format!("send mail to {}", recipient);
            let outcome = bounded(self.mail_timeout, &op, async {
                self.transport
                    .send(&mail)
                    .await
                    .map_err(|e| FluxError::Transport(e.to_string()))
            })
            .await
            .unwrap_or_else(|e| SendOutcome::failure(e.to_string()));

            if outcome.success {
                log.status = DeliveryStatus::Sent;
                log.message_id = outcome.message_id;
                log.sent_at = Some(Utc::now());
            } else {
                log.status = DeliveryStatus::Failed;
                log.error_message = outcome.error;
            }
        }

        match log.status {
            DeliveryStatus::Sent => debug!(
                alert_id = alert.id,
                recipient = %recipient,
                "Email sent"
            ),
            _ => warn!(
                alert_id = alert.id,
                recipient = %recipient,
                error = log.error_message.as_deref().unwrap_or(""),
                "Email not delivered"
            ),
        }

        self.record(&mut log).await;
        log
    }

    /// 写投递日志；失败只记录错误
    async fn record(&self, log: &mut EmailLog) {
        if let Err(e) = self.persist(log).await {
            error!(recipient = %log.recipient, error = %e, "Failed to write email log");
        }
    }

    async fn persist(&self, log: &mut EmailLog) -> Result<()> {
        log.id = self.email_logs.next_id().await?;
        self.email_logs.put(log).await
    }
}
