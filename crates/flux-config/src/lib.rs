pub mod alerting;
pub mod loader;

pub use alerting::{
    AlertingConfig, LogFormat, LoggingConfig, MonitorConfig, NotifyConfig, RateLimitConfig,
    SmtpConfig, TierLimit, TimeoutConfig,
};
pub use loader::ConfigLoader;
