//! Collection descriptor: identity plus mutable configuration.
//!
//! The descriptor is parsed from an options object at create time, persisted
//! as a document `Value` and read back at open. Administrative operations
//! (rename, property updates) change it under the collection's
//! configuration lock.

use docstore_codec::Value;

use crate::collection::is_allowed_collection_name;
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::hlc;
use crate::types::{CollectionId, CollectionType, RevisionId};

/// Page size journal sizes are rounded down to.
pub const PAGE_SIZE: u64 = 4096;

/// Smallest accepted journal size.
pub const MIN_JOURNAL_SIZE: u64 = 1024 * 1024;

/// Largest accepted index bucket count.
pub const MAX_INDEX_BUCKETS: u32 = 1024;

/// Persistent configuration of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    /// Local collection id; zero until assigned by the database.
    pub cid: CollectionId,
    /// Cluster plan id.
    pub plan_id: u64,
    /// Document or edge collection.
    pub collection_type: CollectionType,
    /// Collection name.
    pub name: String,
    /// Segment size after which the log rotates.
    pub maximal_size: u64,
    /// Document count hint recorded at unload, -1 if unknown.
    pub initial_count: i64,
    /// Whether the compactor may process the collection.
    pub do_compact: bool,
    /// Sync the log after every write.
    pub wait_for_sync: bool,
    /// Documents are not persisted.
    pub is_volatile: bool,
    /// System collection (name starts with `_`).
    pub is_system: bool,
    /// Marked as dropped.
    pub deleted: bool,
    /// Bucket count for hash indexes.
    pub index_buckets: u32,
    /// Last revision known at unload.
    pub revision: RevisionId,
    /// Key generator options.
    pub key_options: Option<Value>,
    /// Attributes that decide shard placement.
    pub shard_keys: Vec<String>,
}

impl CollectionInfo {
    /// A document collection named `name` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalName`] for an invalid name.
    pub fn new(name: &str, collection_type: CollectionType, config: &EngineConfig) -> CoreResult<Self> {
        let is_system = name.starts_with('_');
        if !is_allowed_collection_name(name, is_system) {
            return Err(CoreError::IllegalName { name: name.to_string() });
        }
        Ok(Self {
            cid: CollectionId::new(0),
            plan_id: 0,
            collection_type,
            name: name.to_string(),
            maximal_size: config.default_maximal_size,
            initial_count: -1,
            do_compact: true,
            wait_for_sync: config.wait_for_sync,
            is_volatile: false,
            is_system,
            deleted: false,
            index_buckets: config.default_index_buckets,
            revision: RevisionId::default(),
            key_options: None,
            shard_keys: vec![crate::document::KEY.to_string()],
        })
    }

    /// Parses an options object, filling missing values from `config`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IllegalName`] for a missing or invalid name
    /// - [`CoreError::BadParameter`] for malformed or out-of-range options
    pub fn from_value(options: &Value, config: &EngineConfig) -> CoreResult<Self> {
        if !options.is_object() {
            return Err(CoreError::bad_parameter("collection options must be an object"));
        }
        let name = options
            .get("name")
            .and_then(Value::as_text)
            .ok_or_else(|| CoreError::IllegalName { name: String::new() })?;

        let collection_type = match options.get("type") {
            None | Some(Value::Null) => CollectionType::Document,
            Some(Value::Text(t)) if t == "edge" => CollectionType::Edge,
            Some(Value::Text(t)) if t == "document" => CollectionType::Document,
            Some(value) => value
                .as_integer()
                .and_then(|v| u8::try_from(v).ok())
                .and_then(CollectionType::from_u8)
                .ok_or_else(|| CoreError::bad_parameter("invalid collection type"))?,
        };

        let mut info = Self::new(name, collection_type, config)?;
        if let Some(true) = options.get("isSystem").and_then(Value::as_bool) {
            info.is_system = true;
        }

        let cid = read_id(options, "cid")?.or(read_id(options, "id")?).unwrap_or(0);
        info.cid = CollectionId::new(cid);
        info.plan_id = read_id(options, "planId")?.unwrap_or(cid);

        let size = match options.get("journalSize") {
            Some(value) if !value.is_null() => Some(value),
            _ => options.get("maximalSize").filter(|v| !v.is_null()),
        };
        if let Some(size) = size {
            info.maximal_size = journal_size(size)?;
        }

        if let Some(count) = options.get("count").filter(|v| !v.is_null()) {
            info.initial_count = count
                .as_integer()
                .ok_or_else(|| CoreError::bad_parameter("count must be an integer"))?;
        }
        info.do_compact = read_bool(options, "doCompact", info.do_compact)?;
        info.wait_for_sync = read_bool(options, "waitForSync", info.wait_for_sync)?;
        info.is_volatile = read_bool(options, "isVolatile", info.is_volatile)?;
        info.deleted = read_bool(options, "deleted", info.deleted)?;
        if let Some(buckets) = options.get("indexBuckets").filter(|v| !v.is_null()) {
            info.index_buckets = index_buckets(buckets)?;
        }
        if let Some(text) = options.get("revision").and_then(Value::as_text) {
            info.revision = hlc::parse_revision(text)
                .map(|parsed| parsed.revision)
                .unwrap_or_default();
        }
        info.key_options = options.get("keyOptions").filter(|v| v.is_object()).cloned();
        if let Some(keys) = options.get("shardKeys").and_then(Value::as_array) {
            let keys: Option<Vec<String>> = keys.iter().map(|k| k.as_text().map(str::to_string)).collect();
            info.shard_keys = keys
                .filter(|keys| !keys.is_empty())
                .ok_or_else(|| CoreError::bad_parameter("shardKeys must be a non-empty array of strings"))?;
        }

        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.is_volatile && self.wait_for_sync {
            return Err(CoreError::bad_parameter(
                "volatile collections do not support the waitForSync option",
            ));
        }
        Ok(())
    }

    /// Serializes the descriptor for persistence.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut pairs = vec![
            ("cid", Value::Text(self.cid.as_u64().to_string())),
            ("planId", Value::Text(self.plan_id.to_string())),
            ("type", Value::Integer(i64::from(self.collection_type.as_u8()))),
            ("name", Value::from(self.name.as_str())),
            ("maximalSize", Value::Integer(clamp(self.maximal_size))),
            ("count", Value::Integer(self.initial_count)),
            ("doCompact", Value::Bool(self.do_compact)),
            ("waitForSync", Value::Bool(self.wait_for_sync)),
            ("isVolatile", Value::Bool(self.is_volatile)),
            ("isSystem", Value::Bool(self.is_system)),
            ("deleted", Value::Bool(self.deleted)),
            ("indexBuckets", Value::Integer(i64::from(self.index_buckets))),
            ("revision", Value::Text(self.revision.to_string())),
            (
                "shardKeys",
                Value::Array(self.shard_keys.iter().map(|k| Value::from(k.as_str())).collect()),
            ),
        ];
        if let Some(options) = &self.key_options {
            pairs.push(("keyOptions", options.clone()));
        }
        Value::object(pairs)
    }

    /// Applies the changeable properties of `properties`.
    ///
    /// On error the descriptor is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadParameter`] for invalid values.
    pub fn update_properties(&mut self, properties: &Value) -> CoreResult<()> {
        let mut next = self.clone();
        next.do_compact = read_bool(properties, "doCompact", next.do_compact)?;
        next.wait_for_sync = read_bool(properties, "waitForSync", next.wait_for_sync)?;
        if let Some(size) = properties.get("journalSize").filter(|v| !v.is_null()) {
            next.maximal_size = journal_size(size)?;
        }
        if let Some(buckets) = properties.get("indexBuckets").filter(|v| !v.is_null()) {
            next.index_buckets = index_buckets(buckets)?;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Changes the name after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalName`] if the name is not allowed.
    pub fn rename(&mut self, name: &str) -> CoreResult<()> {
        if !is_allowed_collection_name(name, self.is_system) {
            return Err(CoreError::IllegalName { name: name.to_string() });
        }
        self.name = name.to_string();
        Ok(())
    }

    /// True for edge collections.
    #[must_use]
    pub fn is_edge(&self) -> bool {
        self.collection_type == CollectionType::Edge
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn read_id(options: &Value, name: &str) -> CoreResult<Option<u64>> {
    match options.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(v)) => u64::try_from(*v)
            .map(Some)
            .map_err(|_| CoreError::bad_parameter(format!("{name} must not be negative"))),
        Some(Value::Text(text)) => text
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CoreError::bad_parameter(format!("{name} must be numeric"))),
        Some(_) => Err(CoreError::bad_parameter(format!("{name} must be a number or numeric string"))),
    }
}

fn read_bool(options: &Value, name: &str, default: bool) -> CoreResult<bool> {
    match options.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| CoreError::bad_parameter(format!("{name} must be a boolean"))),
    }
}

fn journal_size(value: &Value) -> CoreResult<u64> {
    let size = value
        .as_integer()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| CoreError::bad_parameter("journalSize must be a non-negative integer"))?;
    let size = size / PAGE_SIZE * PAGE_SIZE;
    if size < MIN_JOURNAL_SIZE {
        return Err(CoreError::bad_parameter(format!(
            "journalSize is too small, must be at least {MIN_JOURNAL_SIZE}"
        )));
    }
    Ok(size)
}

fn index_buckets(value: &Value) -> CoreResult<u32> {
    value
        .as_integer()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| (1..=MAX_INDEX_BUCKETS).contains(v))
        .ok_or_else(|| CoreError::bad_parameter(format!("indexBuckets must be between 1 and {MAX_INDEX_BUCKETS}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: Vec<(&str, Value)>) -> Value {
        Value::object(pairs)
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        let info = CollectionInfo::from_value(&options(vec![("name", "users".into())]), &config).unwrap();
        assert_eq!(info.collection_type, CollectionType::Document);
        assert_eq!(info.maximal_size, 32 * 1024 * 1024);
        assert_eq!(info.initial_count, -1);
        assert!(info.do_compact);
        assert!(!info.wait_for_sync);
        assert!(!info.is_volatile);
        assert!(!info.deleted);
        assert!(!info.is_system);
        assert_eq!(info.index_buckets, 8);
    }

    #[test]
    fn journal_size_is_rounded_to_pages() {
        let config = EngineConfig::default();
        let info = CollectionInfo::from_value(
            &options(vec![("name", "c".into()), ("journalSize", Value::Integer(2 * 1024 * 1024 + 100))]),
            &config,
        )
        .unwrap();
        assert_eq!(info.maximal_size, 2 * 1024 * 1024);

        let err = CollectionInfo::from_value(
            &options(vec![("name", "c".into()), ("journalSize", Value::Integer(1024))]),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::BadParameter { .. }));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let config = EngineConfig::default();
        let bad = [
            options(vec![("name", "c".into()), ("indexBuckets", Value::Integer(0))]),
            options(vec![("name", "c".into()), ("indexBuckets", Value::Integer(2048))]),
            options(vec![
                ("name", "c".into()),
                ("isVolatile", true.into()),
                ("waitForSync", true.into()),
            ]),
            options(vec![("name", "c".into()), ("doCompact", "yes".into())]),
        ];
        for options in &bad {
            assert!(matches!(
                CollectionInfo::from_value(options, &config),
                Err(CoreError::BadParameter { .. })
            ));
        }
        assert!(matches!(
            CollectionInfo::from_value(&options(vec![("name", "1abc".into())]), &config),
            Err(CoreError::IllegalName { .. })
        ));
    }

    #[test]
    fn value_roundtrip() {
        let config = EngineConfig::default();
        let mut info = CollectionInfo::from_value(
            &options(vec![
                ("name", "_system_edges".into()),
                ("type", Value::Integer(3)),
                ("cid", "1234".into()),
                ("keyOptions", Value::object([("type", Value::from("autoincrement"))])),
            ]),
            &config,
        )
        .unwrap();
        info.initial_count = 17;
        let back = CollectionInfo::from_value(&info.to_value(), &config).unwrap();
        assert_eq!(back, info);
        assert!(back.is_system);
        assert!(back.is_edge());
        assert_eq!(back.plan_id, 1234);
    }

    #[test]
    fn update_properties_is_all_or_nothing() {
        let config = EngineConfig::default();
        let mut info = CollectionInfo::new("c", CollectionType::Document, &config).unwrap();
        info.update_properties(&options(vec![
            ("waitForSync", true.into()),
            ("indexBuckets", Value::Integer(16)),
        ]))
        .unwrap();
        assert!(info.wait_for_sync);
        assert_eq!(info.index_buckets, 16);

        let before = info.clone();
        assert!(info
            .update_properties(&options(vec![
                ("doCompact", false.into()),
                ("journalSize", Value::Integer(10)),
            ]))
            .is_err());
        assert_eq!(info, before);
    }

    #[test]
    fn rename_validates() {
        let config = EngineConfig::default();
        let mut info = CollectionInfo::new("c", CollectionType::Document, &config).unwrap();
        assert!(info.rename("_hidden").is_err());
        info.rename("d-2").unwrap();
        assert_eq!(info.name, "d-2");
    }
}
