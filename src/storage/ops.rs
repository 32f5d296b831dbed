use std::fmt;

use serde::{Deserialize, Serialize};

use super::condition::{Condition, UpdateAction};
use crate::core::{Item, ItemKey, StoreError, Value};

/// One conditional write, usable alone or as an item of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        table: String,
        item: Item,
        condition: Condition,
    },
    Update {
        table: String,
        key: ItemKey,
        actions: Vec<UpdateAction>,
        condition: Condition,
    },
    Delete {
        table: String,
        key: ItemKey,
        condition: Condition,
    },
}

impl WriteOp {
    pub fn put(table: &str, item: Item, condition: Condition) -> Self {
        Self::Put {
            table: table.to_string(),
            item,
            condition,
        }
    }

    pub fn update(table: &str, key: ItemKey, actions: Vec<UpdateAction>, condition: Condition) -> Self {
        Self::Update {
            table: table.to_string(),
            key,
            actions,
            condition,
        }
    }

    pub fn delete(table: &str, key: ItemKey, condition: Condition) -> Self {
        Self::Delete {
            table: table.to_string(),
            key,
            condition,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    pub fn condition(&self) -> &Condition {
        match self {
            Self::Put { condition, .. }
            | Self::Update { condition, .. }
            | Self::Delete { condition, .. } => condition,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Opaque continuation token for a range scan.
///
/// Callers must pass it back verbatim; its contents are private to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    pub(crate) fn encode(key: &ItemKey) -> Result<Self, StoreError> {
        serde_json::to_string(key)
            .map(Self)
            .map_err(|err| StoreError::Internal(format!("encode cursor: {}", err)))
    }

    pub(crate) fn decode(&self) -> Result<ItemKey, StoreError> {
        serde_json::from_str(&self.0)
            .map_err(|_| StoreError::Validation("malformed continuation cursor".to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Range query over one partition, newest (highest sort key) first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub table: String,
    pub partition: Value,
    /// Only items whose sort key is strictly below this bound.
    pub sort_before: Option<Value>,
    pub cursor: Option<Cursor>,
    pub limit: Option<usize>,
}

impl QueryRequest {
    pub fn new(table: &str, partition: impl Into<Value>) -> Self {
        Self {
            table: table.to_string(),
            partition: partition.into(),
            sort_before: None,
            cursor: None,
            limit: None,
        }
    }

    pub fn sort_before(mut self, bound: Option<Value>) -> Self {
        self.sort_before = bound;
        self
    }

    pub fn cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    /// Present only when more items remain after this page.
    pub cursor: Option<Cursor>,
}
