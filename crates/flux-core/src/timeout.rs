use crate::error::{FluxError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 为协作方调用加上超时，超时视为失败而不是无限挂起
pub async fn bounded<F, T>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = %operation,
                timeout_ms = limit.as_millis() as u64,
                "Collaborator call timed out"
            );
            Err(FluxError::Timeout(format!(
                "{} exceeded {}ms",
                operation,
                limit.as_millis()
            )))
        }
    }
}
