use crate::evaluator::RuleEvaluator;
use crate::rules::RuleService;
use chrono::{DateTime, Utc};
use flux_core::{Filter, Query, Repository, Result, SortDirection};
use flux_types::LogEvent;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 监控服务运行统计
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub is_running: bool,
    /// 启用中的规则数
    pub rules_monitored: usize,
    /// 当前处于触发状态的规则数
    pub active_rules: usize,
    pub total_triggers: u64,
    pub high_water_mark: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
}

/// 单轮监控结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub events: usize,
    pub rules_evaluated: usize,
    pub alerts_created: usize,
    pub failures: usize,
}

struct MonitorTaskHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl MonitorTaskHandle {
    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join_handle.await;
    }
}

/// 规则监控服务
///
/// 按固定间隔拉取 ID 大于高水位的新日志，对所有启用的规则并发评估，
/// 整批评估结束后才推进高水位。
pub struct MonitorService {
    rules: Arc<RuleService>,
    logs: Repository<LogEvent>,
    evaluator: RuleEvaluator,
    check_interval: Duration,
    max_concurrent: usize,

    task: Mutex<Option<MonitorTaskHandle>>,
    /// 串行化 start，首轮执行期间不占用 task 锁
    start_lock: Mutex<()>,
    /// 手动与定时触发的轮次互斥
    cycle_lock: Mutex<()>,
    high_water_mark: AtomicU64,
    total_triggers: AtomicU64,
    cycles_completed: AtomicU64,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
}

impl MonitorService {
    pub fn new(
        rules: Arc<RuleService>,
        logs: Repository<LogEvent>,
        evaluator: RuleEvaluator,
        check_interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            rules,
            logs,
            evaluator,
            check_interval,
            max_concurrent: max_concurrent.max(1),
            task: Mutex::new(None),
            start_lock: Mutex::new(()),
            cycle_lock: Mutex::new(()),
            high_water_mark: AtomicU64::new(0),
            total_triggers: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            last_cycle_at: RwLock::new(None),
        }
    }

    /// 启动监控；已在运行时返回 false
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        let _starting = self.start_lock.lock().await;
        if self.is_running().await {
            warn!("Monitoring is already running");
            return Ok(false);
        }

        self.evaluator.states().load().await?;

        if let Err(e) = self.run_cycle().await {
            error!(error = %e, "Initial monitoring cycle failed");
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(service.check_interval);
            // 慢轮次之后不补跑积压的 tick
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 首轮已在启动时执行
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.run_cycle().await {
                            error!(error = %e, "Monitoring cycle failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *self.task.lock().await = Some(MonitorTaskHandle {
            shutdown_tx,
            join_handle,
        });
        info!(
            interval_secs = self.check_interval.as_secs(),
            max_concurrent = self.max_concurrent,
            "Monitoring started"
        );
        Ok(true)
    }

    /// 停止监控，等待进行中的一轮结束；未运行时返回 false
    pub async fn stop(&self) -> bool {
        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                info!("Monitoring stopped");
                true
            }
            None => {
                debug!("Monitoring is not running");
                false
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// 执行一轮监控
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;
        let mut report = CycleReport::default();

        let rules = self.rules.list_enabled().await?;
        if rules.is_empty() {
            debug!("No enabled rules, skipping cycle");
            self.finish_cycle().await;
            return Ok(report);
        }

        let mark = self.high_water_mark.load(Ordering::SeqCst);
        let query = Query::new()
            .filter(Filter::gt("id", mark))
            .sort_by("id", SortDirection::Asc);
        let batch = self.logs.query(&query).await?.items;
        if batch.is_empty() {
            debug!(high_water_mark = mark, "No new log events");
            self.finish_cycle().await;
            return Ok(report);
        }

        report.events = batch.len();
        let alerts_created = AtomicUsize::new(0);
        let failures = AtomicUsize::new(0);

        stream::iter(rules.iter())
            .for_each_concurrent(self.max_concurrent, |rule| {
                let batch = &batch;
                let alerts_created = &alerts_created;
                let failures = &failures;
                async move {
                    match self.evaluator.evaluate(rule, batch).await {
                        Ok(outcome) => {
                            if outcome.alert.is_some() {
                                alerts_created.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        Err(e) => {
                            failures.fetch_add(1, Ordering::SeqCst);
                            error!(rule_id = rule.id, error = %e, "Rule evaluation failed");
                        }
                    }
                }
            })
            .await;

        let new_mark = batch.iter().map(|e| e.id).max().unwrap_or(mark);
        self.high_water_mark.fetch_max(new_mark, Ordering::SeqCst);

        report.rules_evaluated = rules.len();
        report.alerts_created = alerts_created.into_inner();
        report.failures = failures.into_inner();
        self.total_triggers
            .fetch_add(report.alerts_created as u64, Ordering::SeqCst);
        self.finish_cycle().await;

        info!(
            events = report.events,
            rules = report.rules_evaluated,
            alerts = report.alerts_created,
            failures = report.failures,
            high_water_mark = new_mark,
            "Monitoring cycle completed"
        );
        Ok(report)
    }

    async fn finish_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
        *self.last_cycle_at.write().await = Some(Utc::now());
    }

    pub async fn stats(&self) -> Result<MonitorStats> {
        Ok(MonitorStats {
            is_running: self.is_running().await,
            rules_monitored: self.rules.list_enabled().await?.len(),
            active_rules: self.evaluator.states().active_count().await,
            total_triggers: self.total_triggers.load(Ordering::SeqCst),
            high_water_mark: self.high_water_mark.load(Ordering::SeqCst),
            last_cycle_at: *self.last_cycle_at.read().await,
            cycles_completed: self.cycles_completed.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{app_parts, error_rate_rule, seed_logs};
    use flux_core::Collection;
    use flux_types::{AlertStatus, DeliveryStatus, LogLevel, RuleMetric};

    #[tokio::test]
    async fn test_threshold_crossing_creates_one_alert() {
        let parts = app_parts(vec![]);
        let monitor = parts.monitor();
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com, dev@x.com"))
            .await
            .unwrap();

        // 25 条日志中 3 条错误，错误率 12%
        seed_logs(&parts.logs, 22, 3).await;
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.events, 25);
        assert_eq!(report.alerts_created, 1);

        let alerts = parts.alerts.get_alerts(Default::default()).await.unwrap();
        assert_eq!(alerts.total, 1);
        let alert = &alerts.items[0];
        assert_eq!(alert.title, "High error rate");
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.source, "monitoring");
        assert_eq!(alert.metadata["trigger_count"], 1);
        assert_eq!(alert.metadata["metric"], RuleMetric::ErrorRate.as_str());

        let mut sent = parts.mailer.sent_to();
        sent.sort();
        assert_eq!(sent, vec!["dev@x.com", "ops@x.com"]);
        assert_eq!(
            parts.mailer.sent_subjects(),
            vec!["[WARNING] High error rate", "[WARNING] High error rate"]
        );
        let history = parts.alerts.delivery_history(alert.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|l| l.status == DeliveryStatus::Sent));

        let stats = monitor.stats().await.unwrap();
        assert_eq!(stats.high_water_mark, 25);
        assert_eq!(stats.total_triggers, 1);
        assert_eq!(stats.active_rules, 1);
    }

    #[tokio::test]
    async fn test_still_satisfied_does_not_fire_again() {
        let parts = app_parts(vec![]);
        let monitor = parts.monitor();
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com"))
            .await
            .unwrap();

        seed_logs(&parts.logs, 22, 3).await;
        monitor.run_cycle().await.unwrap();

        // 再追加 71 条正常日志和 4 条错误：窗口内 7/100 = 7%
        seed_logs(&parts.logs, 71, 4).await;
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.alerts_created, 0);

        let state = parts.states.snapshot(1).await.unwrap().unwrap();
        assert!(state.is_active);
        assert!((state.current_value - 7.0).abs() < 1e-9);
        assert_eq!(state.trigger_count, 1);
        assert_eq!(parts.store.len(Collection::Alerts).await, 1);
    }

    #[tokio::test]
    async fn test_no_new_events_skips_cycle() {
        let parts = app_parts(vec![]);
        let monitor = parts.monitor();
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com"))
            .await
            .unwrap();

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.rules_evaluated, 0);
        assert!(parts.states.is_empty());
        assert_eq!(monitor.stats().await.unwrap().cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_failed_rule_does_not_block_others() {
        let parts = app_parts(vec![]);
        let monitor = parts.monitor();
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com"))
            .await
            .unwrap();
        let mut second = error_rate_rule("dev@x.com");
        second.name = "Any error".into();
        second.metric = "error_count".into();
        second.threshold = "0".into();
        parts.rules.create_rule(second).await.unwrap();

        seed_logs(&parts.logs, 22, 3).await;
        parts.store.set_unavailable(Collection::Alerts, true).await;
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.failures, 2);
        assert_eq!(report.alerts_created, 0);

        // 失败的规则未进入触发状态，存储恢复后下一批日志到来时再次触发
        parts.store.set_unavailable(Collection::Alerts, false).await;
        parts
            .logs
            .put(&LogEvent::new(26, LogLevel::Error, "boom"))
            .await
            .unwrap();
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.alerts_created, 2);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let parts = app_parts(vec![]);
        let monitor = parts.monitor();
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com"))
            .await
            .unwrap();
        seed_logs(&parts.logs, 22, 3).await;

        assert!(monitor.start().await.unwrap());
        assert!(!monitor.start().await.unwrap());
        assert!(monitor.is_running().await);

        // 启动时立即执行一轮
        assert_eq!(parts.store.len(Collection::Alerts).await, 1);

        assert!(monitor.stop().await);
        assert!(!monitor.stop().await);
        let stats = monitor.stats().await.unwrap();
        assert!(!stats.is_running);
        assert_eq!(stats.active_rules, 1);
    }

    #[tokio::test]
    async fn test_status_readable_during_initial_cycle() {
        let parts = app_parts(vec![]);
        let monitor = parts.monitor();
        parts
            .rules
            .create_rule(error_rate_rule("ops@x.com"))
            .await
            .unwrap();
        seed_logs(&parts.logs, 22, 3).await;

        // 占住轮次锁，让启动停在首轮
        let cycle = monitor.cycle_lock.lock().await;
        let starting = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.start().await }
        });
        tokio::task::yield_now().await;

        let running = tokio::time::timeout(Duration::from_millis(200), monitor.is_running())
            .await
            .unwrap();
        assert!(!running);
        let stats = tokio::time::timeout(Duration::from_millis(200), monitor.stats())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.cycles_completed, 0);

        drop(cycle);
        assert!(starting.await.unwrap().unwrap());
        assert!(monitor.is_running().await);
        assert_eq!(parts.store.len(Collection::Alerts).await, 1);
        assert!(monitor.stop().await);
    }
}
