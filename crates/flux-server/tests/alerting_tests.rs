use async_trait::async_trait;
use flux_config::AlertingConfig;
use flux_core::{FluxError, MemoryStore, Repository};
use flux_notify::{EmailLogQuery, MailTransport, OutgoingMail, RateLimitTier, SendOutcome};
use flux_rule::AlertQuery;
use flux_server::AlertingApp;
use flux_types::{
    AlertSeverity, AlertStatus, DeliveryStatus, LogEvent, LogLevel, NewAlert, NewRule, RuleUpdate,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingMailer {
    fn recipients(&self) -> Vec<String> {
        let mut to: Vec<String> = self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect();
        to.sort();
        to
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<SendOutcome> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(SendOutcome::delivered(format!("<{}@test>", mail.to)))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct Harness {
    app: AlertingApp,
    mailer: Arc<RecordingMailer>,
    logs: Repository<LogEvent>,
}

fn harness(config: AlertingConfig) -> Harness {
    let store = MemoryStore::new();
    let mailer = Arc::new(RecordingMailer::default());
    let logs = Repository::new(Arc::new(store.clone()), Duration::from_secs(1));
    let app = AlertingApp::new(config, Arc::new(store), mailer.clone());
    Harness { app, mailer, logs }
}

fn error_rate_rule() -> NewRule {
    NewRule {
        name: "High error rate".to_string(),
        metric: "error_rate".to_string(),
        condition: "greater than".to_string(),
        threshold: "5".to_string(),
        notify: "Page ops@x.com and dev@x.com".to_string(),
        channel: "email".to_string(),
        enabled: true,
    }
}

async fn push_logs(logs: &Repository<LogEvent>, infos: usize, errors: usize) {
    for i in 0..infos + errors {
        let level = if i < infos { LogLevel::Info } else { LogLevel::Error };
        let id = logs.next_id().await.unwrap();
        logs.put(&LogEvent::new(id, level, "request handled"))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_monitoring_end_to_end() {
    let h = harness(AlertingConfig::default());
    let rule = h.app.create_rule(error_rate_rule()).await.unwrap();

    // 12% 错误率
    push_logs(&h.logs, 22, 3).await;
    assert!(h.app.start_monitoring().await.unwrap());

    let alerts = h.app.list_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts.total, 1);
    assert_eq!(alerts.items[0].severity, AlertSeverity::Warning);
    assert_eq!(alerts.items[0].metadata["rule_id"], rule.id);
    assert_eq!(h.mailer.recipients(), vec!["dev@x.com", "ops@x.com"]);

    // 7% 仍满足条件，不产生新告警
    push_logs(&h.logs, 71, 4).await;
    h.app.monitor().run_cycle().await.unwrap();
    assert_eq!(h.app.list_alerts(AlertQuery::default()).await.unwrap().total, 1);

    let state = h.app.rule_state(rule.id).await.unwrap();
    assert!(state.is_active);
    assert_eq!(state.trigger_count, 1);

    let stats = h.app.monitoring_stats().await.unwrap();
    assert!(stats.is_running);
    assert_eq!(stats.rules_monitored, 1);
    assert_eq!(stats.high_water_mark, 100);
    assert_eq!(stats.total_triggers, 1);

    assert!(h.app.stop_monitoring().await);
    assert!(!h.app.monitoring_stats().await.unwrap().is_running);
}

#[tokio::test]
async fn test_reset_rule_state_allows_refire() {
    let h = harness(AlertingConfig::default());
    let rule = h.app.create_rule(error_rate_rule()).await.unwrap();

    assert_eq!(h.app.trigger("error_rate", 12.0, "api").await.unwrap().len(), 1);
    assert!(h.app.trigger("error_rate", 12.0, "api").await.unwrap().is_empty());

    h.app.reset_rule_state(rule.id).await.unwrap();
    assert_eq!(h.app.rule_state(rule.id).await.unwrap().trigger_count, 0);
    assert_eq!(h.app.trigger("error_rate", 12.0, "api").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deleted_rule_no_longer_evaluated() {
    let h = harness(AlertingConfig::default());
    let rule = h.app.create_rule(error_rate_rule()).await.unwrap();
    h.app.trigger("error_rate", 12.0, "api").await.unwrap();

    h.app.delete_rule(rule.id).await.unwrap();
    assert!(matches!(
        h.app.rule_state(rule.id).await,
        Err(FluxError::NotFound(_))
    ));
    assert!(h.app.trigger("error_rate", 50.0, "api").await.unwrap().is_empty());

    // 历史告警保留
    assert_eq!(h.app.list_alerts(AlertQuery::default()).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_disabled_rule_via_update() {
    let h = harness(AlertingConfig::default());
    let rule = h.app.create_rule(error_rate_rule()).await.unwrap();
    h.app
        .update_rule(
            rule.id,
            RuleUpdate {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(h.app.trigger("error_rate", 50.0, "api").await.unwrap().is_empty());
    assert_eq!(h.app.list_rules().await.unwrap().len(), 1);
    assert!(!h.app.get_rule(rule.id).await.unwrap().enabled);
}

#[tokio::test]
async fn test_per_recipient_limit_end_to_end() {
    let h = harness(AlertingConfig::default());

    for i in 0..11 {
        h.app
            .create_alert(
                NewAlert::new(format!("Alert {}", i), "details", AlertSeverity::Info, "api")
                    .with_email(vec!["a@x.com".to_string()]),
            )
            .await
            .unwrap();
    }

    let logs = h
        .app
        .email_logs(EmailLogQuery {
            recipient: Some("a@x.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.total, 11);

    // 最新的一条被限流
    let newest = &logs.items[0];
    assert_eq!(newest.status, DeliveryStatus::Failed);
    assert!(newest
        .error_message
        .as_deref()
        .unwrap()
        .to_lowercase()
        .contains("per-recipient"));
    assert!(logs.items[1..].iter().all(|l| l.status == DeliveryStatus::Sent));

    let status = h.app.rate_limit_status(Some("a@x.com"));
    let usage = status
        .usage
        .iter()
        .find(|u| u.tier == RateLimitTier::PerRecipient)
        .unwrap();
    assert_eq!(usage.count, 10);

    h.app.reset_rate_limit("a@x.com");
    let alert = h
        .app
        .create_alert(
            NewAlert::new("After reset", "details", AlertSeverity::Info, "api")
                .with_email(vec!["a@x.com".to_string()]),
        )
        .await
        .unwrap();
    let logs = h
        .app
        .email_logs(EmailLogQuery {
            alert_id: Some(alert.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.items[0].status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn test_alert_lifecycle_through_facade() {
    let mut config = AlertingConfig::default();
    config.notify.default_recipients = vec!["oncall@x.com".to_string()];
    let h = harness(config);

    let alert = h
        .app
        .create_alert(NewAlert::new("Disk full", "95% used", AlertSeverity::Critical, "api"))
        .await
        .unwrap();
    assert_eq!(h.app.count_active_alerts().await.unwrap(), 1);

    let acked = h.app.acknowledge_alert(alert.id, "alice").await.unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);

    let resolved = h.app.resolve_alert(alert.id).await.unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(h.mailer.recipients(), vec!["oncall@x.com"]);

    assert!(matches!(
        h.app.acknowledge_alert(alert.id, "bob").await,
        Err(FluxError::Validation(_))
    ));

    h.app.delete_alert(alert.id).await.unwrap();
    assert!(matches!(
        h.app.get_alert(alert.id).await,
        Err(FluxError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_send_test_email_and_system_reset() {
    let mut config = AlertingConfig::default();
    config.rate_limit.system.max_requests = 2;
    let h = harness(config);

    assert_eq!(
        h.app.send_test_email("a@x.com").await.unwrap().status,
        DeliveryStatus::Sent
    );
    assert_eq!(
        h.app.send_test_email("b@x.com").await.unwrap().status,
        DeliveryStatus::Sent
    );
    let denied = h.app.send_test_email("c@x.com").await.unwrap();
    assert_eq!(denied.status, DeliveryStatus::Failed);
    assert!(denied.error_message.unwrap().starts_with("System-wide"));

    h.app.reset_system_rate_limit();
    assert_eq!(
        h.app.send_test_email("c@x.com").await.unwrap().status,
        DeliveryStatus::Sent
    );
    assert!(!h.app.rate_limit_status(None).entries.is_empty());
}
