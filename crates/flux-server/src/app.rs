//! 告警服务门面。
//!
//! 把存储、通知、规则监控各组件装配在一起，对外提供规则、告警、
//! 限流、投递日志与监控控制等操作。

use anyhow::Result as AnyResult;
use flux_config::AlertingConfig;
use flux_core::{DocumentStore, FluxError, Page, Repository, Result};
use flux_notify::{
    EmailLogQuery, LogMailer, MailTransport, NotificationDispatcher, RateLimitSnapshot,
    RateLimitUsage, RateLimiter, SmtpMailer, SweeperHandle, TemplateSet,
};
use flux_rule::{
    AlertManager, AlertPage, AlertQuery, MetricAggregator, MonitorService, MonitorStats,
    RuleEvaluator, RuleService, RuleStateStore, TriggerService,
};
use flux_types::{
    Alert, AlertRule, AlertUpdate, EmailLog, NewAlert, NewRule, RuleEvaluationState, RuleUpdate,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// 限流状态
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    /// 指定收件人时为其各层级用量
    pub usage: Vec<RateLimitUsage>,
    pub entries: Vec<RateLimitSnapshot>,
}

/// 根据配置选择邮件传输：配置了 SMTP 则真实发信，否则只写日志
pub fn build_transport(config: &AlertingConfig) -> AnyResult<Arc<dyn MailTransport>> {
    match &config.smtp {
        Some(smtp) => Ok(Arc::new(SmtpMailer::new(smtp, &config.notify.from_address)?)),
        None => {
            info!("No SMTP configured, emails will only be logged");
            Ok(Arc::new(LogMailer::new()))
        }
    }
}

pub struct AlertingApp {
    config: AlertingConfig,
    rate_limiter: Arc<RateLimiter>,
    dispatcher: NotificationDispatcher,
    alerts: AlertManager,
    rules: Arc<RuleService>,
    states: Arc<RuleStateStore>,
    monitor: Arc<MonitorService>,
    trigger: TriggerService,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl AlertingApp {
    pub fn new(
        config: AlertingConfig,
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let store_timeout = config.timeouts.store();

        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let dispatcher = NotificationDispatcher::new(
            transport,
            rate_limiter.clone(),
            TemplateSet::default(),
            Repository::new(store.clone(), store_timeout),
            config.timeouts.mail(),
        );
        let alerts = AlertManager::new(
            Repository::new(store.clone(), store_timeout),
            dispatcher.clone(),
            config.notify.default_recipients.clone(),
        );

        let states = Arc::new(RuleStateStore::new(Repository::new(
            store.clone(),
            store_timeout,
        )));
        let rules = Arc::new(RuleService::new(
            Repository::new(store.clone(), store_timeout),
            states.clone(),
        ));

        let logs = Repository::new(store, store_timeout);
        let aggregator = MetricAggregator::new(logs.clone(), config.monitor.window());
        let evaluator = RuleEvaluator::new(aggregator, states.clone(), alerts.clone());

        let monitor = Arc::new(MonitorService::new(
            rules.clone(),
            logs,
            evaluator.clone(),
            config.monitor.interval(),
            config.monitor.max_concurrent_evaluations,
        ));
        let trigger = TriggerService::new(rules.clone(), evaluator);

        Self {
            config,
            rate_limiter,
            dispatcher,
            alerts,
            rules,
            states,
            monitor,
            trigger,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<MonitorService> {
        &self.monitor
    }

    // ------------------------------------------------------------------
    // 规则
    // ------------------------------------------------------------------

    pub async fn create_rule(&self, new: NewRule) -> Result<AlertRule> {
        self.rules.create_rule(new).await
    }

    pub async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        self.rules.list_rules().await
    }

    pub async fn get_rule(&self, id: u64) -> Result<AlertRule> {
        self.rules.get_rule(id).await
    }

    pub async fn update_rule(&self, id: u64, update: RuleUpdate) -> Result<AlertRule> {
        self.rules.update_rule(id, update).await
    }

    pub async fn delete_rule(&self, id: u64) -> Result<()> {
        self.rules.delete_rule(id).await
    }

    // ------------------------------------------------------------------
    // 告警
    // ------------------------------------------------------------------

    pub async fn create_alert(&self, new: NewAlert) -> Result<Alert> {
        self.alerts.create_alert(new).await
    }

    pub async fn list_alerts(&self, query: AlertQuery) -> Result<AlertPage> {
        self.alerts.get_alerts(query).await
    }

    pub async fn get_alert(&self, id: u64) -> Result<Alert> {
        self.alerts.get_alert(id).await
    }

    pub async fn update_alert(&self, id: u64, update: AlertUpdate) -> Result<Alert> {
        self.alerts.update_alert(id, update).await
    }

    pub async fn delete_alert(&self, id: u64) -> Result<()> {
        self.alerts.delete_alert(id).await
    }

    pub async fn acknowledge_alert(&self, id: u64, who: &str) -> Result<Alert> {
        self.alerts.acknowledge_alert(id, who).await
    }

    pub async fn resolve_alert(&self, id: u64) -> Result<Alert> {
        self.alerts.resolve_alert(id).await
    }

    pub async fn count_active_alerts(&self) -> Result<u64> {
        self.alerts.count_active().await
    }

    /// 推送指标值，返回本次创建的告警
    pub async fn trigger(&self, metric: &str, value: f64, source: &str) -> Result<Vec<Alert>> {
        self.trigger.trigger(metric, value, source).await
    }

    // ------------------------------------------------------------------
    // 限流与投递
    // ------------------------------------------------------------------

    pub fn rate_limit_status(&self, recipient: Option<&str>) -> RateLimitStatus {
        RateLimitStatus {
            usage: recipient
                .map(|r| self.rate_limiter.usage_for(r))
                .unwrap_or_default(),
            entries: self.rate_limiter.dump(),
        }
    }

    pub fn reset_rate_limit(&self, recipient: &str) {
        self.rate_limiter.reset_recipient(recipient);
    }

    pub fn reset_system_rate_limit(&self) {
        self.rate_limiter.reset_system();
    }

    pub async fn send_test_email(&self, recipient: &str) -> Result<EmailLog> {
        self.dispatcher.send_test_email(recipient).await
    }

    pub async fn email_logs(&self, query: EmailLogQuery) -> Result<Page<EmailLog>> {
        self.dispatcher.email_logs(query).await
    }

    // ------------------------------------------------------------------
    // 监控
    // ------------------------------------------------------------------

    /// 启动监控循环与限流清理任务；已在运行时返回 false
    pub async fn start_monitoring(&self) -> Result<bool> {
        let started = self.monitor.start().await?;

        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() {
            *sweeper = Some(
                self.rate_limiter
                    .clone()
                    .start_sweeper(self.config.rate_limit.sweep_interval()),
            );
        }
        Ok(started)
    }

    /// 停止监控；未运行时返回 false
    pub async fn stop_monitoring(&self) -> bool {
        let stopped = self.monitor.stop().await;
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.shutdown().await;
        }
        stopped
    }

    pub async fn monitoring_stats(&self) -> Result<MonitorStats> {
        self.monitor.stats().await
    }

    /// 规则的评估状态；规则存在但尚未评估过时返回初始状态
    pub async fn rule_state(&self, rule_id: u64) -> Result<RuleEvaluationState> {
        if let Some(state) = self.states.snapshot(rule_id).await? {
            return Ok(state);
        }
        self.rules.get_rule(rule_id).await?;
        Ok(RuleEvaluationState::new(rule_id))
    }

    /// 清除规则的评估状态，下次满足条件时会重新触发
    pub async fn reset_rule_state(&self, rule_id: u64) -> Result<()> {
        let rule_exists = match self.rules.get_rule(rule_id).await {
            Ok(_) => true,
            Err(FluxError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        // 规则已删除但状态残留时也允许清除
        if !rule_exists && self.states.snapshot(rule_id).await?.is_none() {
            return Err(FluxError::not_found("rule", rule_id));
        }
        self.states.retire(rule_id).await?;
        info!(rule_id = rule_id, "Rule state reset");
        Ok(())
    }
}
