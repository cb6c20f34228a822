use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 规则评估状态（每条规则一份）
///
/// `is_active` 是迟滞标志：条件持续满足期间保持为 true，
/// 只有 false → true 的跳变才会产生新告警。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluationState {
    pub rule_id: u64,

    /// 最近一次计算出的指标值
    pub current_value: f64,

    pub is_active: bool,

    pub last_triggered_at: Option<DateTime<Utc>>,

    /// 累计触发次数（只增不减）
    pub trigger_count: u64,

    /// 最近一次触发时的窗口起点
    pub window_start: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl RuleEvaluationState {
    pub fn new(rule_id: u64) -> Self {
        Self {
            rule_id,
            current_value: 0.0,
            is_active: false,
            last_triggered_at: None,
            trigger_count: 0,
            window_start: None,
            last_evaluated_at: None,
        }
    }
}
