//! 邮件发送限流。
//!
//! 四个相互独立的窗口计数层级：按收件人、按（告警, 收件人）、全局、测试邮件。
//! 每个层级的计数器以 SHA-256 散列后的标识为键，检查与自增在
//! `DashMap` 的条目锁内完成。

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use flux_config::{RateLimitConfig, TierLimit};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

const SYSTEM_KEY: &str = "system";

/// 限流层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTier {
    PerRecipient,
    PerAlertRecipient,
    System,
    TestEmail,
}

impl RateLimitTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PerRecipient => "per-recipient",
            Self::PerAlertRecipient => "per-alert-recipient",
            Self::System => "system-wide",
            Self::TestEmail => "test-email",
        }
    }
}

impl fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 计数条目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitEntry {
    pub count: u32,
    /// 窗口到期时间（毫秒时间戳）
    pub reset_at: i64,
}

/// 某层级当前用量
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitUsage {
    pub tier: RateLimitTier,
    pub count: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

/// 限流判定结果
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<RateLimitUsage>,
}

/// 诊断用的条目快照（键为散列值）
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    pub tier: RateLimitTier,
    pub key: String,
    pub count: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

struct TierCounter {
    tier: RateLimitTier,
    limit: TierLimit,
    entries: DashMap<String, RateLimitEntry>,
}

impl TierCounter {
    fn new(tier: RateLimitTier, limit: TierLimit) -> Self {
        Self {
            tier,
            limit,
            entries: DashMap::new(),
        }
    }

    fn key(&self, identifier: &str) -> String {
        let mut h = Sha256::new();
        h.update(self.tier.label().as_bytes());
        h.update(b":");
        h.update(identifier.as_bytes());
        hex::encode(h.finalize())
    }

    fn window_ms(&self) -> i64 {
        (self.limit.window_secs as i64).saturating_mul(1000)
    }

    fn usage(&self, entry: &RateLimitEntry) -> RateLimitUsage {
        RateLimitUsage {
            tier: self.tier,
            count: entry.count,
            limit: self.limit.max_requests,
            reset_at: millis_to_datetime(entry.reset_at),
        }
    }

    /// 检查并自增；达到上限时拒绝且不自增
    fn hit(&self, identifier: &str, now_ms: i64) -> Result<RateLimitUsage, RateLimitUsage> {
        let window = self.window_ms();
        let mut entry = self
            .entries
            .entry(self.key(identifier))
            .or_insert(RateLimitEntry {
                count: 0,
                reset_at: now_ms + window,
            });

        if now_ms >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now_ms + window;
        }

        if entry.count >= self.limit.max_requests {
            return Err(self.usage(&entry));
        }

        entry.count += 1;
        Ok(self.usage(&entry))
    }

    /// 归还一次计数（后续层级拒绝时使用）
    fn refund(&self, identifier: &str, now_ms: i64) {
        if let Some(mut entry) = self.entries.get_mut(&self.key(identifier)) {
            if now_ms < entry.reset_at && entry.count > 0 {
                entry.count -= 1;
            }
        }
    }

    fn peek(&self, identifier: &str, now_ms: i64) -> RateLimitUsage {
        match self.entries.get(&self.key(identifier)) {
            Some(entry) if now_ms < entry.reset_at => self.usage(&entry),
            _ => RateLimitUsage {
                tier: self.tier,
                count: 0,
                limit: self.limit.max_requests,
                reset_at: millis_to_datetime(now_ms + self.window_ms()),
            },
        }
    }

    fn reset(&self, identifier: &str) -> bool {
        self.entries.remove(&self.key(identifier)).is_some()
    }

    fn purge(&self, now_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_at > now_ms);
        before.saturating_sub(self.entries.len())
    }

    fn snapshot(&self) -> Vec<RateLimitSnapshot> {
        self.entries
            .iter()
            .map(|entry| RateLimitSnapshot {
                tier: self.tier,
                key: entry.key().clone(),
                count: entry.value().count,
                limit: self.limit.max_requests,
                reset_at: millis_to_datetime(entry.value().reset_at),
            })
            .collect()
    }
}

/// 邮件限流服务
pub struct RateLimiter {
    per_recipient: TierCounter,
    per_alert_recipient: TierCounter,
    system: TierCounter,
    test_email: TierCounter,
}

/// 后台清理任务句柄
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join_handle.await;
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            per_recipient: TierCounter::new(RateLimitTier::PerRecipient, config.per_recipient),
            per_alert_recipient: TierCounter::new(
                RateLimitTier::PerAlertRecipient,
                config.per_alert_recipient,
            ),
            system: TierCounter::new(RateLimitTier::System, config.system),
            test_email: TierCounter::new(RateLimitTier::TestEmail, config.test_email),
        }
    }

    /// 判断能否向收件人发送邮件（允许时计数）
    ///
    /// 检查顺序：全局 → 测试邮件（如适用）→ 收件人 → 告警+收件人（如给出告警键）。
    /// 第一个拒绝的层级决定结果，之前已计入的层级会被归还。
    pub fn can_send_email(
        &self,
        recipient: &str,
        alert_key: Option<&str>,
        is_test_email: bool,
    ) -> RateLimitDecision {
        self.can_send_email_at(recipient, alert_key, is_test_email, Utc::now())
    }

    pub fn can_send_email_at(
        &self,
        recipient: &str,
        alert_key: Option<&str>,
        is_test_email: bool,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let now_ms = now.timestamp_millis();
        let recipient = normalize(recipient);
        let pair = alert_key.map(|key| format!("{}:{}", key, recipient));

        let mut checks: Vec<(&TierCounter, &str)> = vec![(&self.system, SYSTEM_KEY)];
        if is_test_email {
            checks.push((&self.test_email, recipient.as_str()));
        }
        checks.push((&self.per_recipient, recipient.as_str()));
        if let Some(pair) = pair.as_deref() {
            checks.push((&self.per_alert_recipient, pair));
        }

        let mut granted: Vec<(&TierCounter, &str)> = Vec::with_capacity(checks.len());
        let mut recipient_usage = None;

        for (counter, identifier) in checks {
            match counter.hit(identifier, now_ms) {
                Ok(usage) => {
                    if counter.tier == RateLimitTier::PerRecipient {
                        recipient_usage = Some(usage);
                    }
                    granted.push((counter, identifier));
                }
                Err(usage) => {
                    for (granted_counter, granted_id) in granted {
                        granted_counter.refund(granted_id, now_ms);
                    }
                    let reason = deny_reason(counter, &recipient, alert_key, &usage);
                    debug!(
                        recipient = %recipient,
                        tier = %counter.tier,
                        count = usage.count,
                        limit = usage.limit,
                        "Email rate limited"
                    );
                    return RateLimitDecision {
                        allowed: false,
                        reason: Some(reason),
                        usage: Some(usage),
                    };
                }
            }
        }

        RateLimitDecision {
            allowed: true,
            reason: None,
            usage: recipient_usage,
        }
    }

    /// 收件人各层级的当前用量（不计数）
    pub fn usage_for(&self, recipient: &str) -> Vec<RateLimitUsage> {
        let now_ms = Utc::now().timestamp_millis();
        let recipient = normalize(recipient);
        vec![
            self.system.peek(SYSTEM_KEY, now_ms),
            self.per_recipient.peek(&recipient, now_ms),
            self.test_email.peek(&recipient, now_ms),
        ]
    }

    /// 重置收件人的收件人层级与测试邮件层级计数
    pub fn reset_recipient(&self, recipient: &str) {
        let recipient = normalize(recipient);
        let a = self.per_recipient.reset(&recipient);
        let b = self.test_email.reset(&recipient);
        info!(recipient = %recipient, cleared = a || b, "Recipient rate limit reset");
    }

    /// 重置全局计数
    pub fn reset_system(&self) {
        self.system.reset(SYSTEM_KEY);
        info!("System-wide email rate limit reset");
    }

    /// 导出全部条目
    pub fn dump(&self) -> Vec<RateLimitSnapshot> {
        let mut all = Vec::new();
        for counter in self.counters() {
            all.extend(counter.snapshot());
        }
        all
    }

    /// 清理已过期的条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        self.counters().iter().map(|c| c.purge(now_ms)).sum()
    }

    /// 启动周期清理任务
    pub fn start_sweeper(self: Arc<Self>, every: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            // 第一次 tick 立即返回
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = self.purge_expired();
                        if purged > 0 {
                            debug!(purged = purged, "Expired rate limit entries purged");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Rate limit sweeper stopped");
        });

        SweeperHandle {
            shutdown_tx,
            join_handle,
        }
    }

    fn counters(&self) -> [&TierCounter; 4] {
        [
            &self.system,
            &self.test_email,
            &self.per_recipient,
            &self.per_alert_recipient,
        ]
    }
}

fn normalize(recipient: &str) -> String {
    recipient.trim().to_lowercase()
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(|| {
        warn!(ms = ms, "Rate limit reset time out of range");
        Utc::now()
    })
}

fn deny_reason(
    counter: &TierCounter,
    recipient: &str,
    alert_key: Option<&str>,
    usage: &RateLimitUsage,
) -> String {
    let window = counter.limit.window_secs;
    match counter.tier {
        RateLimitTier::System => format!(
            "System-wide rate limit exceeded: {}/{} emails per {}s",
            usage.count, usage.limit, window
        ),
        RateLimitTier::TestEmail => format!(
            "Test email rate limit exceeded for {}: {}/{} per {}s",
            recipient, usage.count, usage.limit, window
        ),
        RateLimitTier::PerRecipient => format!(
            "Per-recipient rate limit exceeded for {}: {}/{} per {}s",
            recipient, usage.count, usage.limit, window
        ),
        RateLimitTier::PerAlertRecipient => format!(
            "Per-alert-recipient limit reached: {} already notified about alert {} within {}s",
            recipient,
            alert_key.unwrap_or("-"),
            window
        ),
    }
}
