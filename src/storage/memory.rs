use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::engine::KeyValueStore;
use super::ops::{Cursor, QueryOutput, QueryRequest, WriteOp};
use crate::core::{CancellationReason, Item, ItemKey, StoreError, TableSchema, Value};

/// Limits of the in-memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryStoreConfig {
    /// Maximum number of operations accepted in one transaction.
    pub max_transaction_items: usize,
    /// Maximum number of items returned by one query, regardless of the
    /// requested limit.
    pub max_page_items: usize,
    /// Whether canceled transactions report per-item reasons.
    pub report_cancellation_reasons: bool,
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_transaction_items: 100,
            max_page_items: 1_000,
            report_cancellation_reasons: true,
        }
    }
}

/// Total-ordered wrapper so key values can live in a `BTreeMap`.
#[derive(Debug, Clone)]
struct OrderedValue(Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.key_cmp(&other.0)
    }
}

/// Items grouped by partition, each partition ordered by sort key.
struct MemTable {
    schema: TableSchema,
    partitions: BTreeMap<OrderedValue, BTreeMap<OrderedValue, Item>>,
}

impl MemTable {
    fn get(&self, key: &ItemKey) -> Option<&Item> {
        self.partitions
            .get(&OrderedValue(key.partition.clone()))?
            .get(&OrderedValue(key.sort.clone()))
    }

    fn insert(&mut self, key: ItemKey, item: Item) {
        self.partitions
            .entry(OrderedValue(key.partition))
            .or_default()
            .insert(OrderedValue(key.sort), item);
    }

    fn remove(&mut self, key: &ItemKey) {
        let partition = OrderedValue(key.partition.clone());
        if let Some(items) = self.partitions.get_mut(&partition) {
            items.remove(&OrderedValue(key.sort.clone()));
            if items.is_empty() {
                self.partitions.remove(&partition);
            }
        }
    }

    fn len(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }
}

/// Result of evaluating one write against current state, before commit.
struct StagedWrite {
    table: String,
    key: ItemKey,
    next: Option<Item>,
}

/// In-process implementation of [`KeyValueStore`].
///
/// All tables sit behind one lock, so a transaction observes and mutates a
/// consistent state. Conditions, cancellation reasons and paging follow the
/// capability contract exactly.
pub struct InMemoryStore {
    config: InMemoryStoreConfig,
    tables: RwLock<HashMap<String, MemTable>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(InMemoryStoreConfig::default())
    }

    pub fn with_config(config: InMemoryStoreConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &InMemoryStoreConfig {
        &self.config
    }

    /// Registers a table; re-registering an existing name is a no-op.
    pub async fn create_table(&self, schema: TableSchema) {
        let mut tables = self.tables.write().await;
        tables.entry(schema.name.clone()).or_insert_with(|| MemTable {
            schema,
            partitions: BTreeMap::new(),
        });
    }

    pub async fn item_count(&self, table: &str) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        let mem = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(mem.len())
    }

    fn table<'a>(
        tables: &'a HashMap<String, MemTable>,
        name: &str,
    ) -> Result<&'a MemTable, StoreError> {
        tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn key_of(tables: &HashMap<String, MemTable>, op: &WriteOp) -> Result<ItemKey, StoreError> {
        match op {
            WriteOp::Put { table, item, .. } => Self::table(tables, table)?.schema.key_of(item),
            WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => Ok(key.clone()),
        }
    }

    /// Computes the post-write state of the item an operation targets.
    fn stage(
        tables: &HashMap<String, MemTable>,
        op: &WriteOp,
    ) -> Result<(StagedWrite, bool), StoreError> {
        let mem = Self::table(tables, op.table())?;
        let key = Self::key_of(tables, op)?;
        let current = mem.get(&key);
        let passed = op.condition().evaluate(current);

        let next = match op {
            WriteOp::Put { item, .. } => Some(item.clone()),
            WriteOp::Delete { .. } => None,
            WriteOp::Update { actions, .. } => {
                let mut next = current.cloned().unwrap_or_default();
                mem.schema.stamp_key(&mut next, &key);
                for action in actions {
                    if mem.schema.is_key_attr(action.attr()) {
                        return Err(StoreError::Validation(format!(
                            "cannot update key attribute '{}'",
                            action.attr()
                        )));
                    }
                    action.apply(&mut next)?;
                }
                Some(next)
            }
        };

        Ok((
            StagedWrite {
                table: op.table().to_string(),
                key,
                next,
            },
            passed,
        ))
    }

    fn commit(tables: &mut HashMap<String, MemTable>, staged: StagedWrite) {
        if let Some(mem) = tables.get_mut(&staged.table) {
            match staged.next {
                Some(item) => mem.insert(staged.key, item),
                None => mem.remove(&staged.key),
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, table: &str, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let tables = self.tables.read().await;
        let mem = Self::table(&tables, table)?;
        Ok(mem.get(key).cloned())
    }

    async fn write(&self, op: WriteOp) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let (staged, passed) = Self::stage(&tables, &op)?;
        if !passed {
            return Err(StoreError::ConditionalCheckFailed {
                table: staged.table,
                key: staged.key.to_string(),
            });
        }
        Self::commit(&mut tables, staged);
        Ok(())
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Err(StoreError::Validation("transaction has no items".to_string()));
        }
        if ops.len() > self.config.max_transaction_items {
            return Err(StoreError::Validation(format!(
                "transaction has {} items, limit is {}",
                ops.len(),
                self.config.max_transaction_items
            )));
        }

        let mut tables = self.tables.write().await;

        let mut staged = Vec::with_capacity(ops.len());
        let mut reasons = Vec::with_capacity(ops.len());
        for op in &ops {
            let (write, passed) = Self::stage(&tables, op)?;
            let duplicate = staged.iter().any(|other: &StagedWrite| {
                other.table == write.table && other.key.key_cmp(&write.key) == Ordering::Equal
            });
            if duplicate {
                return Err(StoreError::Validation(format!(
                    "transaction touches {} {} more than once",
                    write.table, write.key
                )));
            }
            reasons.push(if passed {
                CancellationReason::None
            } else {
                CancellationReason::ConditionalCheckFailed
            });
            staged.push(write);
        }

        if reasons.iter().any(CancellationReason::is_condition_failure) {
            let reasons = self.config.report_cancellation_reasons.then_some(reasons);
            return Err(StoreError::TransactionCanceled { reasons });
        }

        for write in staged {
            Self::commit(&mut tables, write);
        }
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryOutput, StoreError> {
        let tables = self.tables.read().await;
        let mem = Self::table(&tables, &request.table)?;

        let resume_below = request.cursor.as_ref().map(Cursor::decode).transpose()?;
        let page_size = request
            .limit
            .unwrap_or(usize::MAX)
            .min(self.config.max_page_items);

        // Exclusive upper bound: the tighter of `sort_before` and the cursor.
        let upper = match (request.sort_before.as_ref(), resume_below.as_ref().map(|last| &last.sort)) {
            (Some(before), Some(resumed)) => Some(match before.key_cmp(resumed) {
                Ordering::Less => before,
                _ => resumed,
            }),
            (before, resumed) => before.or(resumed),
        };
        let range = (
            Bound::Unbounded,
            upper.map_or(Bound::Unbounded, |bound| Bound::Excluded(OrderedValue(bound.clone()))),
        );

        let empty = BTreeMap::new();
        let partition = mem
            .partitions
            .get(&OrderedValue(request.partition.clone()))
            .unwrap_or(&empty);
        let mut matching = partition.range(range).rev();

        let mut items = Vec::new();
        let mut last_key = None;
        for (sort, item) in matching.by_ref().take(page_size) {
            items.push(item.clone());
            last_key = Some(ItemKey {
                partition: request.partition.clone(),
                sort: sort.0.clone(),
            });
        }

        let cursor = match (last_key, matching.next()) {
            (Some(last), Some(_)) => Some(Cursor::encode(&last)?),
            _ => None,
        };

        Ok(QueryOutput { items, cursor })
    }
}
