//! The local config table and the diff between two pulls.

use std::collections::BTreeMap;

use confhub_core::OpType;
use dashmap::DashMap;

/// One key that differs between the table and a fresh pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: String,
    pub op: OpType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConfigTable {
    values: DashMap<String, String>,
}

impl ConfigTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Changes that turn the table into `next`: deletions first, then
    /// updates, then creations, each in key order.
    pub fn diff(&self, next: &BTreeMap<String, String>) -> Vec<Change> {
        let current = self.snapshot();
        let mut deleted = Vec::new();
        let mut updated = Vec::new();
        let mut created = Vec::new();

        for (key, old) in &current {
            match next.get(key) {
                None => deleted.push(Change {
                    key: key.clone(),
                    op: OpType::Delete,
                    old_value: Some(old.clone()),
                    new_value: None,
                }),
                Some(new) if new != old => updated.push(Change {
                    key: key.clone(),
                    op: OpType::Update,
                    old_value: Some(old.clone()),
                    new_value: Some(new.clone()),
                }),
                Some(_) => {}
            }
        }
        for (key, new) in next {
            if !current.contains_key(key) {
                created.push(Change {
                    key: key.clone(),
                    op: OpType::Create,
                    old_value: None,
                    new_value: Some(new.clone()),
                });
            }
        }

        deleted.extend(updated);
        deleted.extend(created);
        deleted
    }

    /// Make the table hold exactly `next`.
    pub fn replace(&self, next: &BTreeMap<String, String>) {
        self.values.retain(|key, _| next.contains_key(key));
        for (key, value) in next {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn diff_orders_delete_update_create() {
        let table = ConfigTable::new();
        table.replace(&map(&[("a", "1"), ("b", "1"), ("c", "1")]));

        let changes = table.diff(&map(&[("b", "2"), ("c", "1"), ("d", "1")]));
        let ops: Vec<(&str, OpType)> = changes.iter().map(|c| (c.key.as_str(), c.op)).collect();
        assert_eq!(
            ops,
            vec![("a", OpType::Delete), ("b", OpType::Update), ("d", OpType::Create)]
        );
        assert_eq!(changes[1].old_value.as_deref(), Some("1"));
        assert_eq!(changes[1].new_value.as_deref(), Some("2"));
    }

    #[test]
    fn applying_the_same_pull_twice_changes_nothing() {
        let table = ConfigTable::new();
        let next = map(&[("timeout", "30"), ("retries", "3")]);

        assert_eq!(table.diff(&next).len(), 2);
        table.replace(&next);
        assert!(table.diff(&next).is_empty());
        table.replace(&next);
        assert_eq!(table.snapshot(), next);
    }

    #[test]
    fn replace_drops_missing_keys() {
        let table = ConfigTable::new();
        table.replace(&map(&[("a", "1"), ("b", "2")]));
        table.replace(&map(&[("b", "3")]));
        assert_eq!(table.get("a"), None);
        assert_eq!(table.get("b").as_deref(), Some("3"));
        assert_eq!(table.len(), 1);
    }
}
