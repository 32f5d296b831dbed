use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use super::{StoreError, Value};

/// A stored record: attribute name to value.
pub type Item = BTreeMap<String, Value>;

/// Composite primary key of an item (partition discriminator + sort key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: Value,
    pub sort: Value,
}

impl ItemKey {
    pub fn new(partition: impl Into<Value>, sort: impl Into<Value>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    /// Total order over keys: partition first, then sort key.
    pub fn key_cmp(&self, other: &ItemKey) -> Ordering {
        self.partition
            .key_cmp(&other.partition)
            .then_with(|| self.sort.key_cmp(&other.sort))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.partition, self.sort)
    }
}

/// Names the two key attributes of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub partition_attr: String,
    pub sort_attr: String,
}

impl TableSchema {
    pub fn new(name: &str, partition_attr: &str, sort_attr: &str) -> Self {
        Self {
            name: name.to_string(),
            partition_attr: partition_attr.to_string(),
            sort_attr: sort_attr.to_string(),
        }
    }

    /// Extracts the primary key from an item, failing if either key attribute
    /// is missing or not a valid key type.
    pub fn key_of(&self, item: &Item) -> Result<ItemKey, StoreError> {
        let partition = self.key_attr(item, &self.partition_attr)?;
        let sort = self.key_attr(item, &self.sort_attr)?;
        Ok(ItemKey { partition, sort })
    }

    /// Writes the key attributes into an item (used when an update creates
    /// a previously absent item).
    pub fn stamp_key(&self, item: &mut Item, key: &ItemKey) {
        item.insert(self.partition_attr.clone(), key.partition.clone());
        item.insert(self.sort_attr.clone(), key.sort.clone());
    }

    pub fn is_key_attr(&self, attr: &str) -> bool {
        attr == self.partition_attr || attr == self.sort_attr
    }

    fn key_attr(&self, item: &Item, attr: &str) -> Result<Value, StoreError> {
        match item.get(attr) {
            Some(value @ (Value::Integer(_) | Value::Text(_))) => Ok(value.clone()),
            Some(other) => Err(StoreError::Validation(format!(
                "key attribute '{}' of table '{}' must be INTEGER or TEXT, got {}",
                attr,
                self.name,
                other.type_name()
            ))),
            None => Err(StoreError::Validation(format!(
                "item for table '{}' is missing key attribute '{}'",
                self.name, attr
            ))),
        }
    }
}

/// Converts a serializable record into a store item.
///
/// `None` fields must be skipped by the record's serde attributes; any
/// remaining `null` is dropped so absent and null stay indistinguishable.
pub fn to_item<T: Serialize>(record: &T) -> Result<Item, StoreError> {
    let json = serde_json::to_value(record)
        .map_err(|err| StoreError::Internal(format!("serialize record: {}", err)))?;
    let mut item: Item = serde_json::from_value(json)
        .map_err(|err| StoreError::Internal(format!("record is not an item: {}", err)))?;
    item.retain(|_, value| !value.is_null());
    Ok(item)
}

/// Converts a store item back into a typed record.
pub fn from_item<T: DeserializeOwned>(item: &Item) -> Result<T, StoreError> {
    let json = serde_json::to_value(item)
        .map_err(|err| StoreError::Internal(format!("serialize item: {}", err)))?;
    serde_json::from_value(json)
        .map_err(|err| StoreError::Internal(format!("malformed item: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        lesson_id: i64,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    }

    #[test]
    fn record_item_conversion() {
        let sample = Sample {
            lesson_id: 4,
            title: "Ownership".into(),
            note: None,
        };
        let item = to_item(&sample).unwrap();
        assert_eq!(item.get("lessonId"), Some(&Value::Integer(4)));
        assert!(!item.contains_key("note"));
        let back: Sample = from_item(&item).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn key_extraction_requires_key_attributes() {
        let schema = TableSchema::new("videos", "lessonId", "videoId");
        let mut item = Item::new();
        item.insert("lessonId".into(), Value::Integer(1));
        assert!(matches!(schema.key_of(&item), Err(StoreError::Validation(_))));

        item.insert("videoId".into(), Value::Integer(100));
        assert_eq!(schema.key_of(&item).unwrap(), ItemKey::new(1, 100));
    }
}
