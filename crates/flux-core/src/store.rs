//! 文档存储协作方接口。
//!
//! 存储本身（检索引擎、持久化）不在本项目内实现，这里只定义告警流水线
//! 依赖的最小能力：带过滤/排序/分页的查询、按 ID 读取、覆盖写入、删除，
//! 以及按集合分配递增 ID。

use crate::error::{FluxError, Result};
use crate::timeout::bounded;
use async_trait::async_trait;
use flux_types::{Alert, AlertRule, EmailLog, LogEvent, RuleEvaluationState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// 文档集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Logs,
    Rules,
    RuleStates,
    Alerts,
    EmailLogs,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Logs => "logs",
            Collection::Rules => "rules",
            Collection::RuleStates => "rule_states",
            Collection::Alerts => "alerts",
            Collection::EmailLogs => "email_logs",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 过滤谓词，多个谓词之间为 AND 关系
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// 任一字段包含子串（不区分大小写）
    Contains { fields: Vec<String>, needle: String },
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(field.to_string(), value.into())
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gte(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(field.to_string(), value.into())
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lte(field.to_string(), value.into())
    }

    pub fn contains(fields: &[&str], needle: impl Into<String>) -> Self {
        Filter::Contains {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            needle: needle.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// 查询条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.sort = Some(Sort {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// 分页结果，`total` 为过滤后分页前的总数
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// 文档存储
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, collection: Collection, query: &Query) -> Result<Page<Value>>;

    async fn get(&self, collection: Collection, id: u64) -> Result<Option<Value>>;

    /// 写入或覆盖
    async fn put(&self, collection: Collection, id: u64, doc: Value) -> Result<()>;

    /// 删除，返回文档此前是否存在
    async fn delete(&self, collection: Collection, id: u64) -> Result<bool>;

    /// 分配集合内的下一个 ID
    async fn next_id(&self, collection: Collection) -> Result<u64>;
}

/// 可存入文档存储的实体
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;
    const KIND: &'static str;

    fn doc_id(&self) -> u64;
}

impl Document for LogEvent {
    const COLLECTION: Collection = Collection::Logs;
    const KIND: &'static str = "log event";

    fn doc_id(&self) -> u64 {
        self.id
    }
}

impl Document for AlertRule {
    const COLLECTION: Collection = Collection::Rules;
    const KIND: &'static str = "rule";

    fn doc_id(&self) -> u64 {
        self.id
    }
}

impl Document for RuleEvaluationState {
    const COLLECTION: Collection = Collection::RuleStates;
    const KIND: &'static str = "rule state";

    fn doc_id(&self) -> u64 {
        self.rule_id
    }
}

impl Document for Alert {
    const COLLECTION: Collection = Collection::Alerts;
    const KIND: &'static str = "alert";

    fn doc_id(&self) -> u64 {
        self.id
    }
}

impl Document for EmailLog {
    const COLLECTION: Collection = Collection::EmailLogs;
    const KIND: &'static str = "email log";

    fn doc_id(&self) -> u64 {
        self.id
    }
}

/// 类型化的集合访问，所有调用都受超时约束
pub struct Repository<T> {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            timeout: self.timeout,
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Repository<T> {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            _marker: PhantomData,
        }
    }

    pub async fn get(&self, id: u64) -> Result<Option<T>> {
        let op = format!("get {}/{}", T::COLLECTION, id);
        let raw = bounded(self.timeout, &op, self.store.get(T::COLLECTION, id)).await?;
        match raw {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// 读取，不存在时返回 NotFound
    pub async fn require(&self, id: u64) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| FluxError::not_found(T::KIND, id))
    }

    pub async fn put(&self, doc: &T) -> Result<()> {
        let id = doc.doc_id();
        let value = serde_json::to_value(doc)?;
        let op = format!("put {}/{}", T::COLLECTION, id);
        bounded(self.timeout, &op, self.store.put(T::COLLECTION, id, value)).await
    }

    pub async fn delete(&self, id: u64) -> Result<bool> {
        let op = format!("delete {}/{}", T::COLLECTION, id);
        bounded(self.timeout, &op, self.store.delete(T::COLLECTION, id)).await
    }

    pub async fn query(&self, query: &Query) -> Result<Page<T>> {
        let op = format!("query {}", T::COLLECTION);
        let page = bounded(self.timeout, &op, self.store.query(T::COLLECTION, query)).await?;
        let items = page
            .items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(Page {
            items,
            total: page.total,
        })
    }

    pub async fn next_id(&self) -> Result<u64> {
        let op = format!("next_id {}", T::COLLECTION);
        bounded(self.timeout, &op, self.store.next_id(T::COLLECTION)).await
    }
}
