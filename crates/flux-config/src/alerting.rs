use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 告警流水线配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlertingConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    /// 未配置时只记录日志，不真正发信
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 监控循环配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// 轮询间隔（秒）
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// 指标窗口（秒）
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// 单轮内并发评估的规则数上限
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_evaluations: usize,

    /// 服务启动时自动开始监控
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            window_secs: default_window_secs(),
            max_concurrent_evaluations: default_max_concurrent(),
            auto_start: true,
        }
    }
}

/// 单个限流层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl TierLimit {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// 邮件限流配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_recipient")]
    pub per_recipient: TierLimit,

    #[serde(default = "default_per_alert_recipient")]
    pub per_alert_recipient: TierLimit,

    #[serde(default = "default_system")]
    pub system: TierLimit,

    #[serde(default = "default_test_email")]
    pub test_email: TierLimit,

    /// 过期条目清理间隔（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_recipient: default_per_recipient(),
            per_alert_recipient: default_per_alert_recipient(),
            system: default_system(),
            test_email: default_test_email(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// 通知配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    /// 告警未指定收件人、以及恢复通知时使用的收件人
    #[serde(default)]
    pub default_recipients: Vec<String>,

    #[serde(default = "default_from_address")]
    pub from_address: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            default_recipients: Vec::new(),
            from_address: default_from_address(),
        }
    }
}

/// SMTP 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

/// 协作方调用超时
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_store_ms")]
    pub store_ms: u64,

    #[serde(default = "default_mail_ms")]
    pub mail_ms: u64,
}

impl TimeoutConfig {
    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn mail(&self) -> Duration {
        Duration::from_millis(self.mail_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_ms: default_store_ms(),
            mail_ms: default_mail_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// EnvFilter 指令，`RUST_LOG` 优先
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl AlertingConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.monitor.interval_secs == 0 {
            return Err(anyhow!("monitor.interval_secs must be greater than 0"));
        }
        if self.monitor.window_secs == 0 {
            return Err(anyhow!("monitor.window_secs must be greater than 0"));
        }
        if self.monitor.max_concurrent_evaluations == 0 {
            return Err(anyhow!(
                "monitor.max_concurrent_evaluations must be greater than 0"
            ));
        }

        let tiers = [
            ("per_recipient", &self.rate_limit.per_recipient),
            ("per_alert_recipient", &self.rate_limit.per_alert_recipient),
            ("system", &self.rate_limit.system),
            ("test_email", &self.rate_limit.test_email),
        ];
        for (name, tier) in tiers {
            if tier.max_requests == 0 || tier.window_secs == 0 {
                return Err(anyhow!(
                    "rate_limit.{} needs a positive max_requests and window_secs",
                    name
                ));
            }
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err(anyhow!("rate_limit.sweep_interval_secs must be greater than 0"));
        }

        for recipient in &self.notify.default_recipients {
            if flux_types::extract_emails(recipient).first() != Some(recipient) {
                return Err(anyhow!("invalid default recipient: {}", recipient));
            }
        }

        if self.timeouts.store_ms == 0 || self.timeouts.mail_ms == 0 {
            return Err(anyhow!("timeouts must be greater than 0"));
        }

        if let Some(smtp) = &self.smtp {
            if smtp.host.trim().is_empty() {
                return Err(anyhow!("smtp.host must not be empty"));
            }
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_window_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    8
}

fn default_per_recipient() -> TierLimit {
    TierLimit::new(10, 5 * 60)
}

fn default_per_alert_recipient() -> TierLimit {
    TierLimit::new(1, 60 * 60)
}

fn default_system() -> TierLimit {
    TierLimit::new(100, 60 * 60)
}

fn default_test_email() -> TierLimit {
    TierLimit::new(5, 10 * 60)
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_from_address() -> String {
    "alerts@flux.local".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_store_ms() -> u64 {
    5_000
}

fn default_mail_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}
