//! Shard-key checks for updates on a cluster participant.

use std::fmt;

use docstore_codec::Value;

/// Decides whether a document change would move it to another shard.
pub trait ShardKeyPredicate: Send + Sync + fmt::Debug {
    /// True if `new` places the document on a different shard than `old`.
    fn would_change_shard_key(&self, old: &Value, new: &Value) -> bool;
}

/// Shard placement by a list of attribute paths.
///
/// A missing attribute compares equal to an explicit null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeShardKeys {
    keys: Vec<String>,
    paths: Vec<Vec<String>>,
}

impl AttributeShardKeys {
    /// Shard keys read from `keys` (dotted paths).
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        let paths = keys
            .iter()
            .map(|k| k.split('.').map(str::to_string).collect())
            .collect();
        Self { keys, paths }
    }

    /// The configured attribute names.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl ShardKeyPredicate for AttributeShardKeys {
    fn would_change_shard_key(&self, old: &Value, new: &Value) -> bool {
        self.paths.iter().any(|path| {
            let before = old.get_path(path).unwrap_or(&Value::Null);
            let after = new.get_path(path).unwrap_or(&Value::Null);
            before.compare(after) != std::cmp::Ordering::Equal
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_changed_attribute() {
        let keys = AttributeShardKeys::new(vec!["region".into(), "owner.id".into()]);
        let old = Value::object([
            ("region", Value::from("eu")),
            ("owner", Value::object([("id", Value::from(1))])),
        ]);
        let same = Value::object([
            ("region", Value::from("eu")),
            ("owner", Value::object([("id", Value::from(1)), ("x", Value::from(2))])),
            ("other", Value::from(true)),
        ]);
        let moved = Value::object([
            ("region", Value::from("eu")),
            ("owner", Value::object([("id", Value::from(2))])),
        ]);
        assert!(!keys.would_change_shard_key(&old, &same));
        assert!(keys.would_change_shard_key(&old, &moved));
    }

    #[test]
    fn missing_equals_null() {
        let keys = AttributeShardKeys::new(vec!["s".into()]);
        let old = Value::object([("a", Value::from(1))]);
        let new = Value::object([("s", Value::Null)]);
        assert!(!keys.would_change_shard_key(&old, &new));
        assert_eq!(keys.keys(), ["s".to_string()]);
    }
}
