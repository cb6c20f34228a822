//! 单元测试共用的装配代码

use crate::{
    AlertManager, MetricAggregator, MonitorService, RuleEvaluator, RuleService, RuleStateStore,
    TriggerService,
};
use async_trait::async_trait;
use flux_config::RateLimitConfig;
use flux_core::{MemoryStore, Repository};
use flux_notify::{
    MailTransport, NotificationDispatcher, OutgoingMail, RateLimiter, SendOutcome, TemplateSet,
};
use flux_types::{LogEvent, LogLevel, NewRule};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub(crate) fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_to(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.to).collect()
    }

    pub(crate) fn sent_subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.subject).collect()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<SendOutcome> {
        if self.fail.load(Ordering::SeqCst) {
            return Ok(SendOutcome::failure("mailbox unavailable"));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(SendOutcome::delivered(format!("<{}@test>", mail.to)))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub(crate) struct Parts {
    pub store: MemoryStore,
    pub mailer: Arc<RecordingMailer>,
    pub logs: Repository<LogEvent>,
    pub states: Arc<RuleStateStore>,
    pub alerts: AlertManager,
    pub rules: Arc<RuleService>,
    pub evaluator: RuleEvaluator,
}

impl Parts {
    pub(crate) fn monitor(&self) -> Arc<MonitorService> {
        Arc::new(MonitorService::new(
            self.rules.clone(),
            self.logs.clone(),
            self.evaluator.clone(),
            Duration::from_secs(3600),
            4,
        ))
    }

    pub(crate) fn trigger(&self) -> TriggerService {
        TriggerService::new(self.rules.clone(), self.evaluator.clone())
    }
}

pub(crate) fn app_parts(default_recipients: Vec<String>) -> Parts {
    let store = MemoryStore::new();
    let shared: Arc<dyn flux_core::DocumentStore> = Arc::new(store.clone());
    let timeout = Duration::from_secs(1);
    let mailer = Arc::new(RecordingMailer::default());

    let dispatcher = NotificationDispatcher::new(
        mailer.clone(),
        Arc::new(RateLimiter::new(&RateLimitConfig::default())),
        TemplateSet::default(),
        Repository::new(shared.clone(), timeout),
        Duration::from_millis(500),
    );
    let alerts = AlertManager::new(
        Repository::new(shared.clone(), timeout),
        dispatcher,
        default_recipients,
    );
    let states = Arc::new(RuleStateStore::new(Repository::new(shared.clone(), timeout)));
    let logs: Repository<LogEvent> = Repository::new(shared.clone(), timeout);
    let aggregator = MetricAggregator::new(logs.clone(), Duration::from_secs(300));
    let evaluator = RuleEvaluator::new(aggregator, states.clone(), alerts.clone());
    let rules = Arc::new(RuleService::new(
        Repository::new(shared, timeout),
        states.clone(),
    ));

    Parts {
        store,
        mailer,
        logs,
        states,
        alerts,
        rules,
        evaluator,
    }
}

/// `error_rate greater than 5%`
pub(crate) fn error_rate_rule(notify: &str) -> NewRule {
    NewRule {
        name: "High error rate".to_string(),
        metric: "error_rate".to_string(),
        condition: "greater than".to_string(),
        threshold: "5%".to_string(),
        notify: notify.to_string(),
        channel: "email".to_string(),
        enabled: true,
    }
}

/// 追加日志：先写正常日志，再写错误日志
pub(crate) async fn seed_logs(logs: &Repository<LogEvent>, infos: usize, errors: usize) {
    for i in 0..infos + errors {
        let level = if i < infos { LogLevel::Info } else { LogLevel::Error };
        let id = logs.next_id().await.unwrap();
        logs.put(&LogEvent::new(id, level, format!("event {}", i % 3)))
            .await
            .unwrap();
    }
}
