use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::AlertingConfig;

/// 配置文件名
pub const CONFIG_FILE: &str = "alerting.toml";

/// 环境变量前缀，例如 `FLUX_ALERT__MONITOR__INTERVAL_SECS=10`
pub const ENV_PREFIX: &str = "FLUX_ALERT";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
    use_env: bool,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            use_env: true,
        }
    }

    /// 不叠加环境变量（测试用）
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// 加载告警配置：文件（可缺省）+ 环境变量，然后校验
    pub fn load(&self) -> Result<AlertingConfig> {
        let config_path = self.config_path();

        let mut builder = Config::builder().add_source(
            File::new(
                config_path
                    .to_str()
                    .ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            )
            .required(false),
        );

        if self.use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: AlertingConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults_when_file_missing() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new(temp_dir.path()).without_env();

        let config = loader.load().unwrap();
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.rate_limit.per_recipient.max_requests, 10);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_content = r#"
[monitor]
interval_secs = 15
window_secs = 600
max_concurrent_evaluations = 2

[rate_limit.per_recipient]
max_requests = 3
window_secs = 120

[notify]
default_recipients = ["oncall@example.com"]
from_address = "flux@example.com"

[smtp]
host = "smtp.example.com"
username = "flux"
password = "secret"

[logging]
level = "debug"
format = "json"
"#;
        fs::write(temp_dir.path().join(CONFIG_FILE), config_content).unwrap();

        let loader = ConfigLoader::new(temp_dir.path()).without_env();
        let config = loader.load().unwrap();

        assert_eq!(config.monitor.interval_secs, 15);
        assert_eq!(config.monitor.window_secs, 600);
        assert_eq!(config.rate_limit.per_recipient.max_requests, 3);
        assert_eq!(config.rate_limit.system.max_requests, 100);
        assert_eq!(config.notify.from_address, "flux@example.com");
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
        assert_eq!(config.logging.format, crate::LogFormat::Json);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE),
            "[monitor]\ninterval_secs = 0\n",
        )
        .unwrap();

        let loader = ConfigLoader::new(temp_dir.path()).without_env();
        assert!(loader.load().is_err());
    }
}
