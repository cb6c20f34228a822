use crate::state::RuleStateStore;
use chrono::Utc;
use flux_core::{FluxError, Filter, Query, Repository, Result, SortDirection};
use flux_types::{AlertRule, Condition, NewRule, NotifyChannel, RuleMetric, RuleUpdate};
use std::sync::Arc;
use tracing::{info, warn};

/// 规则管理
pub struct RuleService {
    rules: Repository<AlertRule>,
    states: Arc<RuleStateStore>,
}

impl RuleService {
    pub fn new(rules: Repository<AlertRule>, states: Arc<RuleStateStore>) -> Self {
        Self { rules, states }
    }

    /// 创建规则
    pub async fn create_rule(&self, new: NewRule) -> Result<AlertRule> {
        let channel = validate(&new.name, &new.metric, &new.condition, &new.threshold, &new.channel)?;

        let now = Utc::now();
        let rule = AlertRule {
            id: self.rules.next_id().await?,
            name: new.name.trim().to_string(),
            metric: new.metric.trim().to_string(),
            condition: new.condition.trim().to_string(),
            threshold: new.threshold.trim().to_string(),
            notify: new.notify,
            channel,
            enabled: new.enabled,
            created_at: now,
            updated_at: now,
        };
        warn_without_recipients(&rule);

        self.rules.put(&rule).await?;
        info!(rule_id = rule.id, rule_name = %rule.name, "Rule created");
        Ok(rule)
    }

    pub async fn get_rule(&self, id: u64) -> Result<AlertRule> {
        self.rules.require(id).await
    }

    /// 全部规则（按 ID 升序）
    pub async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let query = Query::new().sort_by("id", SortDirection::Asc);
        Ok(self.rules.query(&query).await?.items)
    }

    pub async fn list_enabled(&self) -> Result<Vec<AlertRule>> {
        let query = Query::new()
            .filter(Filter::eq("enabled", true))
            .sort_by("id", SortDirection::Asc);
        Ok(self.rules.query(&query).await?.items)
    }

    /// 更新规则（只修改给出的字段）
    pub async fn update_rule(&self, id: u64, update: RuleUpdate) -> Result<AlertRule> {
        let mut rule = self.rules.require(id).await?;

        let name = update.name.unwrap_or_else(|| rule.name.clone());
        let metric = update.metric.unwrap_or_else(|| rule.metric.clone());
        let condition = update.condition.unwrap_or_else(|| rule.condition.clone());
        let threshold = update.threshold.unwrap_or_else(|| rule.threshold.clone());
        let channel = update
            .channel
            .unwrap_or_else(|| rule.channel.to_string());

        rule.channel = validate(&name, &metric, &condition, &threshold, &channel)?;
        rule.name = name.trim().to_string();
        rule.metric = metric.trim().to_string();
        rule.condition = condition.trim().to_string();
        rule.threshold = threshold.trim().to_string();
        if let Some(notify) = update.notify {
            rule.notify = notify;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        rule.updated_at = Utc::now();
        warn_without_recipients(&rule);

        self.rules.put(&rule).await?;
        info!(rule_id = id, "Rule updated");
        Ok(rule)
    }

    /// 删除规则并移除其评估状态；已产生的告警与投递记录保留
    pub async fn delete_rule(&self, id: u64) -> Result<()> {
        if !self.rules.delete(id).await? {
            return Err(FluxError::not_found("rule", id));
        }
        self.states.retire(id).await?;
        info!(rule_id = id, "Rule deleted");
        Ok(())
    }
}

fn validate(
    name: &str,
    metric: &str,
    condition: &str,
    threshold: &str,
    channel: &str,
) -> Result<NotifyChannel> {
    if name.trim().is_empty() {
        return Err(FluxError::Validation("rule name must not be empty".into()));
    }
    if metric.trim().is_empty() {
        return Err(FluxError::Validation("rule metric must not be empty".into()));
    }
    if threshold.trim().is_empty() {
        return Err(FluxError::Validation("rule threshold must not be empty".into()));
    }
    condition
        .parse::<Condition>()
        .map_err(FluxError::Validation)?;
    let channel = channel
        .parse::<NotifyChannel>()
        .map_err(FluxError::Validation)?;

    // 未知指标允许保存，评估时按 0 处理
    if metric.trim().parse::<RuleMetric>().is_err() {
        warn!(metric = %metric, "Rule uses an unknown metric and will never fire");
    }

    Ok(channel)
}

fn warn_without_recipients(rule: &AlertRule) {
    if rule.channel == NotifyChannel::Email && rule.email_recipients().is_empty() {
        warn!(
            rule_name = %rule.name,
            "Rule has no email address in notify, default recipients will be used"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{app_parts, error_rate_rule};
    use flux_core::Collection;
    use flux_types::RuleEvaluationState;

    #[tokio::test]
    async fn test_create_and_list_rules() {
        let parts = app_parts(vec![]);
        let rule = parts.rules.create_rule(error_rate_rule("a@x.com")).await.unwrap();
        assert_eq!(rule.id, 1);
        assert_eq!(rule.channel, NotifyChannel::Email);

        let mut disabled = error_rate_rule("b@x.com");
        disabled.name = "Disabled".into();
        disabled.enabled = false;
        parts.rules.create_rule(disabled).await.unwrap();

        assert_eq!(parts.rules.list_rules().await.unwrap().len(), 2);
        let enabled = parts.rules.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_write() {
        let parts = app_parts(vec![]);

        let mut bad = error_rate_rule("a@x.com");
        bad.condition = "roughly".into();
        assert!(matches!(
            parts.rules.create_rule(bad).await,
            Err(FluxError::Validation(_))
        ));

        let mut bad = error_rate_rule("a@x.com");
        bad.channel = "pager".into();
        assert!(matches!(
            parts.rules.create_rule(bad).await,
            Err(FluxError::Validation(_))
        ));

        let mut bad = error_rate_rule("a@x.com");
        bad.name = "  ".into();
        assert!(parts.rules.create_rule(bad).await.is_err());

        assert!(parts.store.is_empty(Collection::Rules).await);
    }

    #[tokio::test]
    async fn test_symbol_condition_accepted() {
        let parts = app_parts(vec![]);
        let mut rule = error_rate_rule("a@x.com");
        rule.condition = ">=".into();
        assert!(parts.rules.create_rule(rule).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_rule() {
        let parts = app_parts(vec![]);
        let rule = parts.rules.create_rule(error_rate_rule("a@x.com")).await.unwrap();

        let updated = parts
            .rules
            .update_rule(
                rule.id,
                RuleUpdate {
                    threshold: Some("10%".into()),
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.threshold, "10%");
        assert!(!updated.enabled);
        assert_eq!(updated.condition, "greater than");

        assert!(matches!(
            parts
                .rules
                .update_rule(
                    rule.id,
                    RuleUpdate {
                        condition: Some("about".into()),
                        ..Default::default()
                    }
                )
                .await,
            Err(FluxError::Validation(_))
        ));
        assert!(matches!(
            parts.rules.update_rule(99, RuleUpdate::default()).await,
            Err(FluxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_rule_retires_state() {
        let parts = app_parts(vec![]);
        let rule = parts.rules.create_rule(error_rate_rule("a@x.com")).await.unwrap();
        parts
            .states
            .persist(&RuleEvaluationState::new(rule.id))
            .await
            .unwrap();

        parts.rules.delete_rule(rule.id).await.unwrap();
        assert!(parts.store.is_empty(Collection::RuleStates).await);
        assert!(matches!(
            parts.rules.delete_rule(rule.id).await,
            Err(FluxError::NotFound(_))
        ));
    }
}
