use anyhow::Result;
use async_trait::async_trait;

/// 待发送邮件
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// 发送结果
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// 邮件传输 trait
///
/// 传输层拒绝投递时返回 `Ok(SendOutcome::failure(..))`；
/// `Err` 表示调用本身出错（地址无法解析、连接失败等），两者都会记入投递日志。
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// 发送邮件
    async fn send(&self, mail: &OutgoingMail) -> Result<SendOutcome>;

    /// 传输名称
    fn name(&self) -> &str;
}
