use crate::error::{FluxError, Result};
use crate::store::{Collection, DocumentStore, Filter, Page, Query, SortDirection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// 文档存储（内存实现）
///
/// 供进程内运行和测试使用。时间戳字符串按时间而非字典序比较。
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<Collection, BTreeMap<u64, Value>>>>,
    sequences: Arc<RwLock<HashMap<Collection, u64>>>,
    unavailable: Arc<RwLock<HashSet<Collection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟集合不可用（后续调用返回 Store 错误）
    pub async fn set_unavailable(&self, collection: Collection, unavailable: bool) {
        let mut set = self.unavailable.write().await;
        if unavailable {
            set.insert(collection);
        } else {
            set.remove(&collection);
        }
    }

    /// 集合中的文档数
    pub async fn len(&self, collection: Collection) -> usize {
        let collections = self.collections.read().await;
        collections.get(&collection).map(|c| c.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection).await == 0
    }

    async fn ensure_available(&self, collection: Collection) -> Result<()> {
        if self.unavailable.read().await.contains(&collection) {
            return Err(FluxError::Store(format!(
                "collection {} is unavailable",
                collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, collection: Collection, query: &Query) -> Result<Page<Value>> {
        self.ensure_available(collection).await?;

        let collections = self.collections.read().await;
        let mut matched: Vec<Value> = collections
            .get(&collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| query.filters.iter().all(|f| matches_filter(doc, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        if let Some(sort) = &query.sort {
            matched.sort_by(|a, b| {
                let ord = match (lookup(a, &sort.field), lookup(b, &sort.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(Page { items, total })
    }

    async fn get(&self, collection: Collection, id: u64) -> Result<Option<Value>> {
        self.ensure_available(collection).await?;
        let collections = self.collections.read().await;
        Ok(collections.get(&collection).and_then(|c| c.get(&id)).cloned())
    }

    async fn put(&self, collection: Collection, id: u64, doc: Value) -> Result<()> {
        self.ensure_available(collection).await?;
        {
            let mut collections = self.collections.write().await;
            collections.entry(collection).or_default().insert(id, doc);
        }

        // 显式写入的 ID 也要推高序号，避免后续分配冲突
        let mut sequences = self.sequences.write().await;
        let seq = sequences.entry(collection).or_insert(0);
        if id > *seq {
            *seq = id;
        }

        debug!(collection = %collection, id = id, "Document stored");
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: u64) -> Result<bool> {
        self.ensure_available(collection).await?;
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(&collection)
            .map(|c| c.remove(&id).is_some())
            .unwrap_or(false))
    }

    async fn next_id(&self, collection: Collection) -> Result<u64> {
        self.ensure_available(collection).await?;
        let mut sequences = self.sequences.write().await;
        let seq = sequences.entry(collection).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }
}

/// 支持 `a.b` 形式的嵌套字段
fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    let value = if field.contains('.') {
        let pointer = format!("/{}", field.replace('.', "/"));
        doc.pointer(&pointer)
    } else {
        doc.get(field)
    };
    value.filter(|v| !v.is_null())
}

fn matches_filter(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(field, expected) => match lookup(doc, field) {
            Some(actual) => compare_values(actual, expected) == Some(Ordering::Equal),
            None => expected.is_null(),
        },
        Filter::Gt(field, bound) => cmp_field(doc, field, bound, |o| o == Ordering::Greater),
        Filter::Gte(field, bound) => cmp_field(doc, field, bound, |o| o != Ordering::Less),
        Filter::Lt(field, bound) => cmp_field(doc, field, bound, |o| o == Ordering::Less),
        Filter::Lte(field, bound) => cmp_field(doc, field, bound, |o| o != Ordering::Greater),
        Filter::Contains { fields, needle } => {
            let needle = needle.to_lowercase();
            fields.iter().any(|f| {
                lookup(doc, f)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
        }
    }
}

fn cmp_field(doc: &Value, field: &str, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    lookup(doc, field)
        .and_then(|actual| compare_values(actual, bound))
        .map(accept)
        .unwrap_or(false)
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                x.parse::<DateTime<Utc>>().ok(),
                y.parse::<DateTime<Utc>>().ok(),
            ) {
                (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
