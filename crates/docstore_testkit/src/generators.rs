//! Property-based test generators using proptest.
//!
//! Provides strategies for documents and mutation sequences. Keys are drawn
//! from a small pool so that generated operations hit each other.

use docstore_codec::Value;
use docstore_core::{CoreError, CoreResult, DocumentCollection, OperationOptions, OperationResult, Transaction};
use proptest::prelude::*;

/// Strategy for generating valid document keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,16}").expect("Invalid regex")
}

/// Strategy for keys from a pool of `pool` names (`k0`, `k1`, ...).
pub fn pooled_key_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("k{i}"))
}

/// Strategy for generating valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_-]{0,31}").expect("Invalid regex")
}

/// Strategy for scalar attribute values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[a-z ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for a document body without system attributes.
pub fn body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex"),
        scalar_strategy(),
        1..5,
    )
    .prop_map(Value::object)
}

/// One generated mutation.
#[derive(Debug, Clone)]
pub enum CollectionOperation {
    /// Insert `body` under `key`.
    Insert {
        /// Document key.
        key: String,
        /// Attributes.
        body: Value,
    },
    /// Merge `body` into `key`.
    Update {
        /// Document key.
        key: String,
        /// Attributes.
        body: Value,
    },
    /// Replace `key` by `body`.
    Replace {
        /// Document key.
        key: String,
        /// Attributes.
        body: Value,
    },
    /// Remove `key`.
    Remove {
        /// Document key.
        key: String,
    },
}

impl CollectionOperation {
    /// The key the operation targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Insert { key, .. } | Self::Update { key, .. } | Self::Replace { key, .. } | Self::Remove { key } => {
                key
            }
        }
    }

    /// Runs the operation against `collection`.
    pub fn apply(
        &self,
        collection: &DocumentCollection,
        trx: &Transaction,
        options: &OperationOptions,
    ) -> CoreResult<OperationResult> {
        match self {
            Self::Insert { key, body } => collection.insert(trx, &with_key(key, body), options, true),
            Self::Update { key, body } => collection.update(trx, &with_key(key, body), options, true),
            Self::Replace { key, body } => collection.replace(trx, &with_key(key, body), options, true),
            Self::Remove { key } => collection.remove(trx, &Value::from(key.as_str()), options, true),
        }
    }
}

fn with_key(key: &str, body: &Value) -> Value {
    let mut value = body.clone();
    value.set("_key", Value::from(key));
    value
}

/// Strategy for a single operation over a pool of `pool` keys.
pub fn operation_strategy(pool: usize) -> impl Strategy<Value = CollectionOperation> {
    prop_oneof![
        3 => (pooled_key_strategy(pool), body_strategy())
            .prop_map(|(key, body)| CollectionOperation::Insert { key, body }),
        2 => (pooled_key_strategy(pool), body_strategy())
            .prop_map(|(key, body)| CollectionOperation::Update { key, body }),
        1 => (pooled_key_strategy(pool), body_strategy())
            .prop_map(|(key, body)| CollectionOperation::Replace { key, body }),
        2 => pooled_key_strategy(pool).prop_map(|key| CollectionOperation::Remove { key }),
    ]
}

/// Strategy for a sequence of operations.
pub fn operations_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<CollectionOperation>> {
    prop::collection::vec(operation_strategy(pool), 1..max_len.max(2))
}

/// Applies `operations` in order.
///
/// Missing documents and taken keys are expected outcomes of random
/// sequences and are counted as rejected; any other error is returned.
/// Yields `(applied, rejected)`.
pub fn apply_operations(
    collection: &DocumentCollection,
    trx: &Transaction,
    operations: &[CollectionOperation],
) -> CoreResult<(usize, usize)> {
    let options = OperationOptions::new();
    let mut applied = 0;
    let mut rejected = 0;
    for operation in operations {
        match operation.apply(collection, trx, &options) {
            Ok(_) => applied += 1,
            Err(CoreError::DocumentNotFound { .. } | CoreError::UniqueConstraintViolated { .. }) => rejected += 1,
            Err(e) => return Err(e),
        }
    }
    Ok((applied, rejected))
}
