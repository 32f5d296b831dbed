use std::collections::BTreeSet;

use crate::core::{Item, StoreError, Value};

/// Predicate over the current state of a single item.
///
/// `Exists`/`NotExists` stand in for `attribute_exists(<key>)` style checks:
/// an item either is stored under its key or it is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    Exists,
    NotExists,
    Equals(String, Value),
    /// `attribute_not_exists(<attr>)`: holds for an absent item as well.
    Missing(String),
    And(Vec<Condition>),
}

impl Condition {
    pub fn equals(attr: &str, value: impl Into<Value>) -> Self {
        Self::Equals(attr.to_string(), value.into())
    }

    /// `Exists` plus an equality check per attribute.
    pub fn exists_with(expected: Vec<(&str, Value)>) -> Self {
        let mut parts = vec![Self::Exists];
        parts.extend(
            expected
                .into_iter()
                .map(|(attr, value)| Self::Equals(attr.to_string(), value)),
        );
        Self::And(parts)
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Self::Always => other,
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn evaluate(&self, current: Option<&Item>) -> bool {
        match self {
            Self::Always => true,
            Self::Exists => current.is_some(),
            Self::NotExists => current.is_none(),
            Self::Equals(attr, expected) => current
                .and_then(|item| item.get(attr))
                .is_some_and(|actual| actual == expected),
            Self::Missing(attr) => current.is_none_or(|item| !item.contains_key(attr)),
            Self::And(parts) => parts.iter().all(|part| part.evaluate(current)),
        }
    }
}

/// A single mutation inside an update write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    Set(String, Value),
    /// Numeric increment; a missing attribute counts as zero.
    Add(String, i64),
    AddToSet(String, i64),
    /// Removes a member; an emptied set attribute is dropped.
    RemoveFromSet(String, i64),
    Remove(String),
}

impl UpdateAction {
    pub fn set(attr: &str, value: impl Into<Value>) -> Self {
        Self::Set(attr.to_string(), value.into())
    }

    pub fn add(attr: &str, delta: i64) -> Self {
        Self::Add(attr.to_string(), delta)
    }

    pub fn attr(&self) -> &str {
        match self {
            Self::Set(attr, _)
            | Self::Add(attr, _)
            | Self::AddToSet(attr, _)
            | Self::RemoveFromSet(attr, _)
            | Self::Remove(attr) => attr,
        }
    }

    pub fn apply(&self, item: &mut Item) -> Result<(), StoreError> {
        match self {
            Self::Set(attr, value) => {
                item.insert(attr.clone(), value.clone());
            }
            Self::Add(attr, delta) => {
                let current = match item.get(attr) {
                    None => 0,
                    Some(Value::Integer(n)) => *n,
                    Some(other) => {
                        return Err(StoreError::Validation(format!(
                            "ADD on '{}' requires INTEGER, found {}",
                            attr,
                            other.type_name()
                        )));
                    }
                };
                let next = current.checked_add(*delta).ok_or_else(|| {
                    StoreError::Validation(format!("ADD on '{}' overflows", attr))
                })?;
                item.insert(attr.clone(), Value::Integer(next));
            }
            Self::AddToSet(attr, member) => match item.get_mut(attr) {
                None => {
                    item.insert(attr.clone(), Value::IntegerSet(BTreeSet::from([*member])));
                }
                Some(Value::IntegerSet(set)) => {
                    set.insert(*member);
                }
                Some(other) => {
                    return Err(StoreError::Validation(format!(
                        "ADD to set '{}' requires INTEGER_SET, found {}",
                        attr,
                        other.type_name()
                    )));
                }
            },
            Self::RemoveFromSet(attr, member) => {
                let emptied = match item.get_mut(attr) {
                    None => false,
                    Some(Value::IntegerSet(set)) => {
                        set.remove(member);
                        set.is_empty()
                    }
                    Some(other) => {
                        return Err(StoreError::Validation(format!(
                            "DELETE from set '{}' requires INTEGER_SET, found {}",
                            attr,
                            other.type_name()
                        )));
                    }
                };
                if emptied {
                    item.remove(attr);
                }
            }
            Self::Remove(attr) => {
                item.remove(attr);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson() -> Item {
        let mut item = Item::new();
        item.insert("lessonId".into(), Value::Integer(1));
        item.insert("numberOfVideos".into(), Value::Integer(2));
        item
    }

    #[test]
    fn conditions_against_present_and_absent_items() {
        let item = lesson();
        assert!(Condition::Exists.evaluate(Some(&item)));
        assert!(!Condition::Exists.evaluate(None));
        assert!(Condition::NotExists.evaluate(None));
        assert!(Condition::equals("numberOfVideos", 2).evaluate(Some(&item)));
        assert!(!Condition::equals("numberOfVideos", 3).evaluate(Some(&item)));
        assert!(!Condition::equals("numberOfVideos", 2).evaluate(None));

        let guarded = Condition::exists_with(vec![("numberOfVideos", Value::Integer(2))]);
        assert!(guarded.evaluate(Some(&item)));
        assert!(!guarded.evaluate(None));
    }

    #[test]
    fn missing_attribute_check() {
        let item = lesson();
        let no_categories = Condition::Exists.and(Condition::Missing("categories".into()));
        assert!(no_categories.evaluate(Some(&item)));
        assert!(!no_categories.evaluate(None));
        assert!(!Condition::Missing("numberOfVideos".into()).evaluate(Some(&item)));
        assert!(Condition::Missing("numberOfVideos".into()).evaluate(None));
    }

    #[test]
    fn add_treats_missing_as_zero() {
        let mut item = lesson();
        UpdateAction::add("numberOfAttachments", 1).apply(&mut item).unwrap();
        UpdateAction::add("numberOfVideos", -1).apply(&mut item).unwrap();
        assert_eq!(item["numberOfAttachments"], Value::Integer(1));
        assert_eq!(item["numberOfVideos"], Value::Integer(1));
    }

    #[test]
    fn set_membership_updates() {
        let mut item = lesson();
        UpdateAction::AddToSet("categories".into(), 7).apply(&mut item).unwrap();
        UpdateAction::AddToSet("categories".into(), 7).apply(&mut item).unwrap();
        assert_eq!(item["categories"], Value::IntegerSet(BTreeSet::from([7])));

        UpdateAction::RemoveFromSet("categories".into(), 7).apply(&mut item).unwrap();
        assert!(!item.contains_key("categories"));
        UpdateAction::RemoveFromSet("categories".into(), 7).apply(&mut item).unwrap();
    }

    #[test]
    fn add_rejects_non_integer() {
        let mut item = lesson();
        item.insert("title".into(), Value::from("x"));
        assert!(UpdateAction::add("title", 1).apply(&mut item).is_err());
    }
}
