//! 阈值规则监控。
//!
//! 监控循环按间隔拉取新日志，逐条规则计算窗口指标并与阈值比较；
//! 条件从不满足变为满足时创建告警并分发邮件通知。

pub mod aggregator;
pub mod evaluator;
pub mod lifecycle;
pub mod monitor;
pub mod rules;
pub mod state;
pub mod trigger;

pub use aggregator::{aggregate, MetricAggregator};
pub use evaluator::{severity_for, EvaluationOutcome, RuleEvaluator};
pub use lifecycle::{AlertManager, AlertPage, AlertQuery};
pub use monitor::{MonitorService, MonitorStats};
pub use rules::RuleService;
pub use state::RuleStateStore;
pub use trigger::TriggerService;

#[cfg(test)]
pub(crate) mod tests_support;
