//! FLUX 告警流水线的共享数据模型。
//!
//! 所有实体都以 JSON 文档的形式存放在外部文档存储中，标识均为
//! 由存储按集合分配的 `u64` 序号。

pub mod alert;
pub mod email;
pub mod log;
pub mod rule;
pub mod state;

pub use alert::{Alert, AlertSeverity, AlertStatus, AlertUpdate, NewAlert};
pub use email::{DeliveryStatus, EmailLog};
pub use log::{LogEvent, LogLevel};
pub use rule::{
    extract_emails, parse_threshold, AlertRule, Condition, MetricFamily, NewRule, NotifyChannel,
    RuleMetric, RuleUpdate,
};
pub use state::RuleEvaluationState;
