use thiserror::Error;

/// FLUX 告警流水线统一错误类型
#[derive(Error, Debug)]
pub enum FluxError {
    /// 按 ID 引用的告警或规则不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 字段不合法、未知渠道/条件、非法状态流转
    #[error("Validation error: {0}")]
    Validation(String),

    /// 文档存储调用失败
    #[error("Store error: {0}")]
    Store(String),

    /// 邮件传输失败
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, FluxError>;

impl FluxError {
    pub fn not_found(kind: &str, id: u64) -> Self {
        FluxError::NotFound(format!("{} {} does not exist", kind, id))
    }

    /// 外部协作方的临时性失败（只影响当前规则/收件人）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FluxError::Store(_) | FluxError::Transport(_) | FluxError::Timeout(_)
        )
    }
}

impl From<anyhow::Error> for FluxError {
    fn from(err: anyhow::Error) -> Self {
        FluxError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FluxError::Store("down".into()).is_transient());
        assert!(FluxError::Timeout("mail".into()).is_transient());
        assert!(!FluxError::not_found("alert", 7).is_transient());
        assert!(!FluxError::Validation("bad".into()).is_transient());
    }

    #[test]
    fn test_not_found_message() {
        let err = FluxError::not_found("alert", 42);
        assert_eq!(err.to_string(), "Not found: alert 42 does not exist");
    }
}
