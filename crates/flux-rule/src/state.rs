use dashmap::DashMap;
use flux_core::{Query, Repository, Result};
use flux_types::RuleEvaluationState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 规则评估状态缓存
///
/// 每条规则一把互斥锁，评估期间全程持有，保证同一规则的评估串行执行。
/// 缓存由监控服务启动时从存储加载；未命中时从存储按需读取。
pub struct RuleStateStore {
    states: DashMap<u64, Arc<Mutex<RuleEvaluationState>>>,
    repo: Repository<RuleEvaluationState>,
}

impl RuleStateStore {
    pub fn new(repo: Repository<RuleEvaluationState>) -> Self {
        Self {
            states: DashMap::new(),
            repo,
        }
    }

    /// 从存储加载状态，返回缓存中的状态数
    ///
    /// 已缓存的状态比存储更新（可能有写入失败），先回写再保留，
    /// 只补充缓存中没有的规则。
    pub async fn load(&self) -> Result<usize> {
        self.flush().await;

        let page = self.repo.query(&Query::new()).await?;
        for state in page.items {
            self.states
                .entry(state.rule_id)
                .or_insert_with(|| Arc::new(Mutex::new(state)));
        }
        info!(count = self.states.len(), "Rule states loaded");
        Ok(self.states.len())
    }

    /// 回写全部缓存状态，返回写入失败的数量
    pub async fn flush(&self) -> usize {
        let handles: Vec<_> = self.states.iter().map(|e| e.value().clone()).collect();
        let mut failed = 0;
        for handle in handles {
            let state = handle.lock().await;
            if let Err(e) = self.repo.put(&state).await {
                warn!(rule_id = state.rule_id, error = %e, "Failed to flush rule state");
                failed += 1;
            }
        }
        failed
    }

    /// 取得规则状态的锁句柄（不存在时读取存储或新建）
    pub async fn handle(&self, rule_id: u64) -> Result<Arc<Mutex<RuleEvaluationState>>> {
        if let Some(handle) = self.states.get(&rule_id) {
            return Ok(handle.clone());
        }

        let state = self
            .repo
            .get(rule_id)
            .await?
            .unwrap_or_else(|| RuleEvaluationState::new(rule_id));

        // 并发首次访问时以先插入者为准
        let handle = self
            .states
            .entry(rule_id)
            .or_insert_with(|| Arc::new(Mutex::new(state)))
            .clone();
        Ok(handle)
    }

    pub async fn persist(&self, state: &RuleEvaluationState) -> Result<()> {
        self.repo.put(state).await
    }

    /// 当前状态快照
    pub async fn snapshot(&self, rule_id: u64) -> Result<Option<RuleEvaluationState>> {
        let cached = self.states.get(&rule_id).map(|h| h.clone());
        match cached {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => self.repo.get(rule_id).await,
        }
    }

    /// 移除规则状态（缓存与存储），等待进行中的评估结束
    pub async fn retire(&self, rule_id: u64) -> Result<bool> {
        let cached = self.states.get(&rule_id).map(|h| h.clone());
        let _guard = match &cached {
            Some(handle) => Some(handle.lock().await),
            None => None,
        };

        self.states.remove(&rule_id);
        let existed = self.repo.delete(rule_id).await?;
        debug!(rule_id = rule_id, "Rule state retired");
        Ok(existed || cached.is_some())
    }

    /// 已缓存的状态数
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// 处于触发状态的规则数
    pub async fn active_count(&self) -> usize {
        let handles: Vec<_> = self.states.iter().map(|e| e.value().clone()).collect();
        let mut active = 0;
        for handle in handles {
            if handle.lock().await.is_active {
                active += 1;
            }
        }
        active
    }
}
