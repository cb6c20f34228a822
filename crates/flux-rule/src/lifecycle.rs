use chrono::Utc;
use flux_core::{FluxError, Filter, Query, Repository, Result, SortDirection};
use flux_notify::{NotificationDispatcher, NotificationKind};
use flux_types::{
    extract_emails, Alert, AlertSeverity, AlertStatus, AlertUpdate, EmailLog, NewAlert,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 告警列表查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertQuery {
    /// 标题或正文子串（不区分大小写）
    pub search: Option<String>,
    pub severity: Option<AlertSeverity>,
    pub status: Option<AlertStatus>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// 告警分页结果
#[derive(Debug, Clone, Serialize)]
pub struct AlertPage {
    pub items: Vec<Alert>,
    pub total: u64,
}

/// 告警生命周期管理
///
/// 状态只能向前流转：active → acknowledged → resolved，已恢复的告警只允许删除。
#[derive(Clone)]
pub struct AlertManager {
    alerts: Repository<Alert>,
    dispatcher: NotificationDispatcher,
    default_recipients: Arc<Vec<String>>,
}

impl AlertManager {
    pub fn new(
        alerts: Repository<Alert>,
        dispatcher: NotificationDispatcher,
        default_recipients: Vec<String>,
    ) -> Self {
        Self {
            alerts,
            dispatcher,
            default_recipients: Arc::new(default_recipients),
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// 创建告警，按需发送通知
    ///
    /// 通知失败只写入投递日志，不影响告警本身。
    pub async fn create_alert(&self, new: NewAlert) -> Result<Alert> {
        if new.title.trim().is_empty() {
            return Err(FluxError::Validation("alert title must not be empty".into()));
        }

        let now = Utc::now();
        let alert = Alert {
            id: self.alerts.next_id().await?,
            title: new.title,
            message: new.message,
            severity: new.severity,
            status: AlertStatus::Active,
            source: new.source,
            metadata: if new.metadata.is_null() {
                serde_json::json!({})
            } else {
                new.metadata
            },
            created_at: now,
            updated_at: now,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
        };
        self.alerts.put(&alert).await?;

        info!(
            alert_id = alert.id,
            severity = %alert.severity,
            source = %alert.source,
            "Alert created"
        );

        if new.send_email {
            let recipients = self.resolve_recipients(&new.recipients);
            if recipients.is_empty() {
                debug!(alert_id = alert.id, "No recipients resolved, skipping notification");
            } else {
                self.dispatcher
                    .dispatch(&alert, &recipients, NotificationKind::Alert)
                    .await;
            }
        }

        Ok(alert)
    }

    pub async fn get_alert(&self, id: u64) -> Result<Alert> {
        self.alerts.require(id).await
    }

    pub async fn update_alert(&self, id: u64, update: AlertUpdate) -> Result<Alert> {
        let mut alert = self.alerts.require(id).await?;
        if alert.is_resolved() {
            return Err(FluxError::Validation(format!(
                "alert {} is resolved and can no longer be modified",
                id
            )));
        }

        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(FluxError::Validation("alert title must not be empty".into()));
            }
            alert.title = title;
        }
        if let Some(message) = update.message {
            alert.message = message;
        }
        if let Some(severity) = update.severity {
            alert.severity = severity;
        }
        if let Some(metadata) = update.metadata {
            alert.metadata = metadata;
        }
        alert.updated_at = Utc::now();

        self.alerts.put(&alert).await?;
        debug!(alert_id = id, "Alert updated");
        Ok(alert)
    }

    /// 确认告警（仅 active 状态可确认）
    pub async fn acknowledge_alert(&self, id: u64, who: &str) -> Result<Alert> {
        let mut alert = self.alerts.require(id).await?;
        if alert.status != AlertStatus::Active {
            return Err(FluxError::Validation(format!(
                "alert {} is {} and cannot be acknowledged",
                id, alert.status
            )));
        }

        alert.acknowledge(who);
        self.alerts.put(&alert).await?;
        info!(alert_id = id, acknowledged_by = %who, "Alert acknowledged");
        Ok(alert)
    }

    /// 恢复告警并向默认收件人发送恢复通知
    pub async fn resolve_alert(&self, id: u64) -> Result<Alert> {
        let mut alert = self.alerts.require(id).await?;
        if alert.is_resolved() {
            return Err(FluxError::Validation(format!("alert {} is already resolved", id)));
        }

        alert.resolve();
        self.alerts.put(&alert).await?;
        info!(alert_id = id, "Alert resolved");

        if !self.default_recipients.is_empty() {
            self.dispatcher
                .dispatch(&alert, &self.default_recipients, NotificationKind::Resolved)
                .await;
        }

        Ok(alert)
    }

    pub async fn delete_alert(&self, id: u64) -> Result<()> {
        if !self.alerts.delete(id).await? {
            return Err(FluxError::not_found("alert", id));
        }
        info!(alert_id = id, "Alert deleted");
        Ok(())
    }

    /// 查询告警（按 ID 倒序）
    pub async fn get_alerts(&self, query: AlertQuery) -> Result<AlertPage> {
        let mut q = Query::new()
            .sort_by("id", SortDirection::Desc)
            .offset(query.offset);
        if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
            q = q.filter(Filter::contains(&["title", "message"], search.trim()));
        }
        if let Some(severity) = query.severity {
            q = q.filter(Filter::eq("severity", severity.as_str()));
        }
        if let Some(status) = query.status {
            q = q.filter(Filter::eq("status", status.as_str()));
        }
        if let Some(limit) = query.limit {
            q = q.limit(limit);
        }

        let page = self.alerts.query(&q).await?;
        Ok(AlertPage {
            items: page.items,
            total: page.total,
        })
    }

    pub async fn count_active(&self) -> Result<u64> {
        let q = Query::new()
            .filter(Filter::eq("status", AlertStatus::Active.as_str()))
            .limit(0);
        Ok(self.alerts.query(&q).await?.total)
    }

    /// 告警的投递记录
    pub async fn delivery_history(&self, id: u64) -> Result<Vec<EmailLog>> {
        let page = self
            .dispatcher
            .email_logs(flux_notify::EmailLogQuery {
                alert_id: Some(id),
                ..Default::default()
            })
            .await?;
        Ok(page.items)
    }

    fn resolve_recipients(&self, explicit: &[String]) -> Vec<String> {
        let mut recipients: Vec<String> = Vec::new();
        for raw in explicit {
            let found = extract_emails(raw);
            if found.is_empty() {
                warn!(recipient = %raw, "Ignoring invalid recipient");
            }
            for addr in found {
                if !recipients.contains(&addr) {
                    recipients.push(addr);
                }
            }
        }

        if recipients.is_empty() {
            self.default_recipients.as_ref().clone()
        } else {
            recipients
        }
    }
}
