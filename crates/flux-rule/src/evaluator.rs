use crate::aggregator::{window_start, MetricAggregator};
use crate::lifecycle::AlertManager;
use crate::state::RuleStateStore;
use chrono::Utc;
use flux_core::Result;
use flux_types::{
    Alert, AlertRule, AlertSeverity, Condition, LogEvent, MetricFamily, NewAlert, NotifyChannel,
    RuleEvaluationState, RuleMetric,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 单次评估结果
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub rule_id: u64,
    pub current_value: f64,
    pub satisfied: bool,
    /// 本次评估创建的告警（仅在 false → true 跳变时）
    pub alert: Option<Alert>,
    pub state: RuleEvaluationState,
}

/// 按指标族计算告警级别
pub fn severity_for(metric: &str, value: f64, threshold: f64) -> AlertSeverity {
    let ratio = if threshold == 0.0 {
        if value > 0.0 {
            f64::INFINITY
        } else {
            1.0
        }
    } else {
        value / threshold
    };

    let family = metric
        .parse::<RuleMetric>()
        .map(|m| m.family())
        .unwrap_or(MetricFamily::Other);

    match family {
        MetricFamily::Error => {
            if ratio >= 3.0 {
                AlertSeverity::Critical
            } else if ratio >= 1.5 {
                AlertSeverity::Warning
            } else {
                AlertSeverity::Info
            }
        }
        MetricFamily::ResponseTime => {
            if value >= threshold * 2.0 {
                AlertSeverity::Critical
            } else if value >= threshold * 1.5 {
                AlertSeverity::Warning
            } else {
                AlertSeverity::Info
            }
        }
        MetricFamily::ClientError => {
            if ratio >= 2.0 {
                AlertSeverity::Warning
            } else {
                AlertSeverity::Info
            }
        }
        MetricFamily::Other => {
            if ratio >= 2.0 {
                AlertSeverity::Critical
            } else if ratio >= 1.5 {
                AlertSeverity::Warning
            } else {
                AlertSeverity::Info
            }
        }
    }
}

/// 规则评估器
///
/// 评估全程持有该规则的状态锁；只有条件从不满足变为满足时才创建告警。
#[derive(Clone)]
pub struct RuleEvaluator {
    aggregator: MetricAggregator,
    states: Arc<RuleStateStore>,
    alerts: AlertManager,
}

impl RuleEvaluator {
    pub fn new(
        aggregator: MetricAggregator,
        states: Arc<RuleStateStore>,
        alerts: AlertManager,
    ) -> Self {
        Self {
            aggregator,
            states,
            alerts,
        }
    }

    pub fn states(&self) -> &Arc<RuleStateStore> {
        &self.states
    }

    /// 根据窗口内日志评估规则
    pub async fn evaluate(&self, rule: &AlertRule, batch: &[LogEvent]) -> Result<EvaluationOutcome> {
        let handle = self.states.handle(rule.id).await?;
        let mut state = handle.lock().await;

        let value = self.aggregator.compute(&rule.metric, batch).await?;
        self.apply(rule, value, None, &mut state).await
    }

    /// 用外部推送的值评估规则
    pub async fn evaluate_value(
        &self,
        rule: &AlertRule,
        value: f64,
        source: &str,
    ) -> Result<EvaluationOutcome> {
        let handle = self.states.handle(rule.id).await?;
        let mut state = handle.lock().await;
        self.apply(rule, value, Some(source), &mut state).await
    }

    async fn apply(
        &self,
        rule: &AlertRule,
        value: f64,
        source: Option<&str>,
        state: &mut RuleEvaluationState,
    ) -> Result<EvaluationOutcome> {
        let now = Utc::now();
        let threshold = rule.threshold_value();
        let satisfied = match rule.condition.parse::<Condition>() {
            Ok(condition) => condition.check(value, threshold),
            Err(_) => {
                warn!(
                    rule_id = rule.id,
                    condition = %rule.condition,
                    "Unknown condition, treating as not satisfied"
                );
                false
            }
        };

        let mut alert = None;
        if satisfied && !state.is_active {
            let trigger_count = state.trigger_count + 1;
            let created = self
                .alerts
                .create_alert(self.build_alert(rule, value, threshold, trigger_count, source))
                .await?;

            state.is_active = true;
            state.last_triggered_at = Some(now);
            state.trigger_count = trigger_count;
            state.window_start = Some(window_start(now, self.aggregator.window()));

            info!(
                rule_id = rule.id,
                alert_id = created.id,
                value = value,
                threshold = threshold,
                "Rule triggered"
            );
            alert = Some(created);
        } else if !satisfied && state.is_active {
            state.is_active = false;
            info!(rule_id = rule.id, value = value, "Rule condition cleared");
        } else {
            debug!(
                rule_id = rule.id,
                value = value,
                satisfied = satisfied,
                active = state.is_active,
                "Rule evaluated"
            );
        }

        state.current_value = value;
        state.last_evaluated_at = Some(now);
        if let Err(e) = self.states.persist(state).await {
            // 告警已创建：缓存保持触发状态，下次加载时回写
            match &alert {
                Some(created) => warn!(
                    rule_id = rule.id,
                    alert_id = created.id,
                    error = %e,
                    "Failed to persist rule state after alert"
                ),
                None => return Err(e),
            }
        }

        Ok(EvaluationOutcome {
            rule_id: rule.id,
            current_value: value,
            satisfied,
            alert,
            state: state.clone(),
        })
    }

    fn build_alert(
        &self,
        rule: &AlertRule,
        value: f64,
        threshold: f64,
        trigger_count: u64,
        source: Option<&str>,
    ) -> NewAlert {
        let severity = severity_for(&rule.metric, value, threshold);
        let window_minutes = self.aggregator.window().as_secs() / 60;

        let mut metadata = serde_json::json!({
            "rule_id": rule.id,
            "rule_name": rule.name,
            "metric": rule.metric,
            "condition": rule.condition,
            "threshold": threshold,
            "current_value": value,
            "trigger_count": trigger_count,
            "window_minutes": window_minutes,
        });
        if let Some(source) = source {
            metadata["trigger_source"] = serde_json::Value::String(source.to_string());
        }

        // 级别前缀由邮件主题模板添加
        let title = rule.name.clone();
        let message = format!(
            "Rule \"{}\": {} is {:.2}, {} threshold {} (window {} min)",
            rule.name, rule.metric, value, rule.condition, rule.threshold, window_minutes
        );

        let new = NewAlert::new(title, message, severity, "monitoring").with_metadata(metadata);
        match rule.channel {
            NotifyChannel::Email => new.with_email(rule.email_recipients()),
            NotifyChannel::Sms => {
                debug!(rule_id = rule.id, "SMS channel has no transport, alert created without notification");
                new
            }
        }
    }
}
