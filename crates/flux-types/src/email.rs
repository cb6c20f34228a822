use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Pending,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// 邮件投递记录（只追加，写入后不再修改）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: u64,

    /// 关联告警；测试邮件为 None
    pub alert_id: Option<u64>,

    pub recipient: String,

    /// 实际渲染出的主题
    pub subject: String,

    pub status: DeliveryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// 邮件传输返回的消息 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    pub sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}
