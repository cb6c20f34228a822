use crate::evaluator::RuleEvaluator;
use crate::rules::RuleService;
use flux_core::{FluxError, Result};
use flux_types::Alert;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 推送式触发
///
/// 外部直接给出某个指标的当前值，对所有使用该指标的启用规则走同一套
/// 条件判断、迟滞与告警级别逻辑。
pub struct TriggerService {
    rules: Arc<RuleService>,
    evaluator: RuleEvaluator,
}

impl TriggerService {
    pub fn new(rules: Arc<RuleService>, evaluator: RuleEvaluator) -> Self {
        Self { rules, evaluator }
    }

    /// 返回本次创建的告警
    pub async fn trigger(&self, metric: &str, value: f64, source: &str) -> Result<Vec<Alert>> {
        let metric = metric.trim();
        if metric.is_empty() {
            return Err(FluxError::Validation("metric must not be empty".into()));
        }
        if !value.is_finite() {
            return Err(FluxError::Validation(format!(
                "metric value must be finite, got {}",
                value
            )));
        }

        let rules: Vec<_> = self
            .rules
            .list_enabled()
            .await?
            .into_iter()
            .filter(|r| r.metric == metric)
            .collect();
        if rules.is_empty() {
            debug!(metric = %metric, "No enabled rule for pushed metric");
            return Ok(Vec::new());
        }

        let mut created = Vec::new();
        for rule in &rules {
            match self.evaluator.evaluate_value(rule, value, source).await {
                Ok(outcome) => created.extend(outcome.alert),
                Err(e) => {
                    error!(rule_id = rule.id, error = %e, "Pushed evaluation failed");
                }
            }
        }

        info!(
            metric = %metric,
            value = value,
            source = %source,
            rules = rules.len(),
            alerts = created.len(),
            "Metric pushed"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use crate::tests_support::{app_parts, error_rate_rule};
    use flux_core::{Collection, FluxError};

    #[tokio::test]
    async fn test_trigger_uses_hysteresis() {
        let parts = app_parts(vec![]);
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com"))
            .await
            .unwrap();
        let trigger = parts.trigger();

        let alerts = trigger.trigger("error_rate", 20.0, "load-balancer").await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "High error rate");
        assert_eq!(parts.mailer.sent_subjects(), vec!["[CRITICAL] High error rate"]);
        assert_eq!(alerts[0].metadata["trigger_source"], "load-balancer");

        // 持续满足不再触发
        assert!(trigger.trigger("error_rate", 30.0, "lb").await.unwrap().is_empty());

        // 清除后再次满足，产生第二条告警
        assert!(trigger.trigger("error_rate", 1.0, "lb").await.unwrap().is_empty());
        let again = trigger.trigger("error_rate", 9.0, "lb").await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].metadata["trigger_count"], 2);

        // 每个告警只通知一次
        assert_eq!(parts.mailer.sent_to().len(), 2);
    }

    #[tokio::test]
    async fn test_state_write_failure_does_not_refire() {
        let parts = app_parts(vec![]);
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com"))
            .await
            .unwrap();
        let trigger = parts.trigger();
        assert!(trigger.trigger("error_rate", 1.0, "lb").await.unwrap().is_empty());

        // 触发时状态写入失败，告警仍返回
        parts.store.set_unavailable(Collection::RuleStates, true).await;
        let fired = trigger.trigger("error_rate", 20.0, "lb").await.unwrap();
        assert_eq!(fired.len(), 1);
        parts.store.set_unavailable(Collection::RuleStates, false).await;

        // 重新加载（监控启动）后不应再次触发
        parts.states.load().await.unwrap();
        assert!(trigger.trigger("error_rate", 20.0, "lb").await.unwrap().is_empty());

        let alerts = parts.alerts.get_alerts(Default::default()).await.unwrap();
        assert_eq!(alerts.total, 1);
        assert_eq!(parts.mailer.sent_to(), vec!["ops@x.com"]);
    }

    #[tokio::test]
    async fn test_trigger_ignores_other_metrics_and_disabled_rules() {
        let parts = app_parts(vec![]);
        let mut disabled = error_rate_rule("ops@x.com");
        disabled.enabled = false;
        parts.rules.create_rule(disabled).await.unwrap();
        let trigger = parts.trigger();

        assert!(trigger.trigger("error_rate", 50.0, "x").await.unwrap().is_empty());
        assert!(trigger.trigger("log_count", 50.0, "x").await.unwrap().is_empty());
        assert!(matches!(
            trigger.trigger(" ", 1.0, "x").await,
            Err(FluxError::Validation(_))
        ));
        assert!(matches!(
            trigger.trigger("error_rate", f64::NAN, "x").await,
            Err(FluxError::Validation(_))
        ));
    }
}
