use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

/// 告警规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// 规则 ID
    pub id: u64,

    /// 规则名称
    pub name: String,

    /// 指标名称（见 [`RuleMetric`]，未知名称在评估时按 0 处理）
    pub metric: String,

    /// 比较条件（见 [`Condition`]）
    pub condition: String,

    /// 阈值原始文本，例如 `"80%"`、`"500ms"`
    pub threshold: String,

    /// 通知目标（自由文本，从中提取邮箱地址）
    #[serde(default)]
    pub notify: String,

    /// 通知渠道
    pub channel: NotifyChannel,

    /// 是否启用
    pub enabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// 解析后的阈值
    pub fn threshold_value(&self) -> f64 {
        parse_threshold(&self.threshold)
    }

    /// 邮件收件人；非邮件渠道返回空列表
    pub fn email_recipients(&self) -> Vec<String> {
        match self.channel {
            NotifyChannel::Email => extract_emails(&self.notify),
            NotifyChannel::Sms => Vec::new(),
        }
    }
}

/// 创建规则的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub metric: String,
    pub condition: String,
    pub threshold: String,
    #[serde(default)]
    pub notify: String,
    pub channel: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 更新规则的输入（仅修改给出的字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub metric: Option<String>,
    pub condition: Option<String>,
    pub threshold: Option<String>,
    pub notify: Option<String>,
    pub channel: Option<String>,
    pub enabled: Option<bool>,
}

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    Email,
    Sms,
}

impl FromStr for NotifyChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

impl fmt::Display for NotifyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
        }
    }
}

/// 支持的聚合指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleMetric {
    ErrorRate,
    ErrorCount,
    LogCount,
    AvgResponseTime,
    MaxResponseTime,
    ClientErrorRate,
    ServerErrorRate,
    UniqueErrors,
}

/// 指标族，决定告警级别的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFamily {
    Error,
    ResponseTime,
    ClientError,
    Other,
}

impl RuleMetric {
    pub const ALL: [RuleMetric; 8] = [
        Self::ErrorRate,
        Self::ErrorCount,
        Self::LogCount,
        Self::AvgResponseTime,
        Self::MaxResponseTime,
        Self::ClientErrorRate,
        Self::ServerErrorRate,
        Self::UniqueErrors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorRate => "error_rate",
            Self::ErrorCount => "error_count",
            Self::LogCount => "log_count",
            Self::AvgResponseTime => "avg_response_time",
            Self::MaxResponseTime => "max_response_time",
            Self::ClientErrorRate => "4xx_rate",
            Self::ServerErrorRate => "5xx_rate",
            Self::UniqueErrors => "unique_errors",
        }
    }

    pub fn family(&self) -> MetricFamily {
        match self {
            Self::ErrorRate | Self::ErrorCount | Self::UniqueErrors | Self::ServerErrorRate => {
                MetricFamily::Error
            }
            Self::AvgResponseTime | Self::MaxResponseTime => MetricFamily::ResponseTime,
            Self::ClientErrorRate => MetricFamily::ClientError,
            Self::LogCount => MetricFamily::Other,
        }
    }
}

impl FromStr for RuleMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .iter()
            .find(|m| m.as_str() == name)
            .copied()
            .ok_or_else(|| format!("unknown metric: {name}"))
    }
}

impl fmt::Display for RuleMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 比较条件
///
/// 每个比较符接受两种写法：单词形式（`greater than`）与符号形式（`>`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Equal,
    NotEqual,
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalized.as_str() {
            "greater than" | ">" => Ok(Self::GreaterThan),
            "greater than or equal" | ">=" => Ok(Self::GreaterEqual),
            "less than" | "<" => Ok(Self::LessThan),
            "less than or equal" | "<=" => Ok(Self::LessEqual),
            "equals" | "==" => Ok(Self::Equal),
            "not equals" | "!=" => Ok(Self::NotEqual),
            _ => Err(format!("unknown condition: {s}")),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::GreaterThan => "greater than",
            Self::GreaterEqual => "greater than or equal",
            Self::LessThan => "less than",
            Self::LessEqual => "less than or equal",
            Self::Equal => "equals",
            Self::NotEqual => "not equals",
        };
        f.write_str(text)
    }
}

impl Condition {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() < f64::EPSILON,
            Self::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// 解析阈值文本：去掉数字、`.`、`-` 以外的字符后按浮点数解析，失败返回 0
pub fn parse_threshold(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// 从自由文本中提取邮箱地址（去重，保持出现顺序）
pub fn extract_emails(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in EMAIL_RE.find_iter(text) {
        let addr = m.as_str().to_string();
        if !found.contains(&addr) {
            found.push(addr);
        }
    }
    found
}
