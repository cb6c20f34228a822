use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 日志事件（告警指标的输入，只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// 单调递增的事件 ID
    pub id: u64,

    /// 事件时间
    pub timestamp: DateTime<Utc>,

    /// 日志级别
    pub level: LogLevel,

    /// 日志消息
    pub message: String,

    /// 产生日志的服务
    #[serde(default)]
    pub source: String,

    /// HTTP 状态码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// 响应耗时（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,

    /// 额外字段
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl LogEvent {
    pub fn new(id: u64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: String::new(),
            status_code: None,
            response_time_ms: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_response_time(mut self, millis: f64) -> Self {
        self.response_time_ms = Some(millis);
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}
