use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use flux_core::{Filter, Query, Repository, Result};
use flux_types::{LogEvent, RuleMetric};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// 按指标名计算一组日志的聚合值
///
/// 未知指标记录警告并返回 0，规则因此永远不会触发。
pub fn aggregate(metric: &str, events: &[LogEvent]) -> f64 {
    match metric.parse::<RuleMetric>() {
        Ok(metric) => aggregate_known(metric, events),
        Err(_) => {
            warn!(metric = %metric, "Unknown metric, treating value as 0");
            0.0
        }
    }
}

fn aggregate_known(metric: RuleMetric, events: &[LogEvent]) -> f64 {
    match metric {
        RuleMetric::ErrorRate => {
            if events.is_empty() {
                return 0.0;
            }
            let errors = events.iter().filter(|e| e.is_error()).count();
            errors as f64 / events.len() as f64 * 100.0
        }
        RuleMetric::ErrorCount => events.iter().filter(|e| e.is_error()).count() as f64,
        RuleMetric::LogCount => events.len() as f64,
        RuleMetric::AvgResponseTime => {
            let times: Vec<f64> = events.iter().filter_map(|e| e.response_time_ms).collect();
            if times.is_empty() {
                return 0.0;
            }
            times.iter().sum::<f64>() / times.len() as f64
        }
        RuleMetric::MaxResponseTime => events
            .iter()
            .filter_map(|e| e.response_time_ms)
            .fold(None, |max: Option<f64>, t| Some(max.map_or(t, |m| m.max(t))))
            .unwrap_or(0.0),
        RuleMetric::ClientErrorRate => status_class_rate(events, 400..500),
        RuleMetric::ServerErrorRate => status_class_rate(events, 500..600),
        RuleMetric::UniqueErrors => events
            .iter()
            .filter(|e| e.is_error())
            .map(|e| e.message.as_str())
            .collect::<HashSet<_>>()
            .len() as f64,
    }
}

/// 带状态码的日志中落在某个区间的百分比
fn status_class_rate(events: &[LogEvent], class: std::ops::Range<u16>) -> f64 {
    let codes: Vec<u16> = events.iter().filter_map(|e| e.status_code).collect();
    if codes.is_empty() {
        return 0.0;
    }
    let hits = codes.iter().filter(|c| class.contains(*c)).count();
    hits as f64 / codes.len() as f64 * 100.0
}

/// 指标聚合器
///
/// 每次计算都从日志集合重新取回窗口内的事件，再并入本轮批次中落在窗口内的事件。
#[derive(Clone)]
pub struct MetricAggregator {
    logs: Repository<LogEvent>,
    window: Duration,
}

impl MetricAggregator {
    pub fn new(logs: Repository<LogEvent>, window: Duration) -> Self {
        Self { logs, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn compute(&self, metric: &str, batch: &[LogEvent]) -> Result<f64> {
        self.compute_at(metric, batch, Utc::now()).await
    }

    pub async fn compute_at(
        &self,
        metric: &str,
        batch: &[LogEvent],
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let metric_kind = match metric.parse::<RuleMetric>() {
            Ok(m) => m,
            Err(_) => return Ok(aggregate(metric, &[])),
        };

        let events = self.window_events(batch, now).await?;
        let value = aggregate_known(metric_kind, &events);
        debug!(metric = %metric, events = events.len(), value = value, "Metric computed");
        Ok(value)
    }

    /// 窗口内事件（按 ID 去重）
    pub async fn window_events(
        &self,
        batch: &[LogEvent],
        now: DateTime<Utc>,
    ) -> Result<Vec<LogEvent>> {
        let since = window_start(now, self.window);
        let query = Query::new().filter(Filter::gte(
            "timestamp",
            since.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ));
        let stored = self.logs.query(&query).await?;

        let mut merged: BTreeMap<u64, LogEvent> = stored
            .items
            .into_iter()
            .map(|event| (event.id, event))
            .collect();
        for event in batch.iter().filter(|e| e.timestamp >= since) {
            merged.entry(event.id).or_insert_with(|| event.clone());
        }

        Ok(merged.into_values().collect())
    }
}

pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::zero());
    now - window
}
