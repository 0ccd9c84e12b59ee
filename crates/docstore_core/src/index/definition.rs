//! Index descriptors: parsing, matching and materialization.

use docstore_codec::Value;

use crate::error::{CoreError, CoreResult};
use crate::index::edge::EdgeIndex;
use crate::index::fulltext::{FulltextIndex, DEFAULT_MIN_LENGTH};
use crate::index::geo::GeoIndex;
use crate::index::hash::HashIndex;
use crate::index::skiplist::SkiplistIndex;
use crate::index::traits::{Index, IndexKind};
use crate::types::IndexId;

/// Parsed index descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Stored id; `None` for a definition that has not been created yet.
    pub id: Option<IndexId>,
    /// Index kind.
    pub kind: IndexKind,
    /// Attribute paths.
    pub fields: Vec<String>,
    /// Uniqueness flag.
    pub unique: bool,
    /// Sparsity flag.
    pub sparse: bool,
    /// geo1 only: location stored as `[lon, lat]`.
    pub geo_json: bool,
    /// fulltext only: minimum word length.
    pub min_length: usize,
}

impl IndexDefinition {
    fn request(kind: IndexKind, fields: Vec<String>, unique: bool, sparse: bool) -> Self {
        Self {
            id: None,
            kind,
            fields,
            unique,
            sparse,
            geo_json: false,
            min_length: DEFAULT_MIN_LENGTH,
        }
    }

    /// A hash index request.
    #[must_use]
    pub fn hash(fields: Vec<String>, unique: bool, sparse: bool) -> Self {
        Self::request(IndexKind::Hash, fields, unique, sparse)
    }

    /// A skiplist index request.
    #[must_use]
    pub fn skiplist(fields: Vec<String>, unique: bool, sparse: bool) -> Self {
        Self::request(IndexKind::Skiplist, fields, unique, sparse)
    }

    /// A persistent index request.
    #[must_use]
    pub fn persistent(fields: Vec<String>, unique: bool, sparse: bool) -> Self {
        Self::request(IndexKind::Persistent, fields, unique, sparse)
    }

    /// A geo index request: geo1 for one field, geo2 for two.
    #[must_use]
    pub fn geo(fields: Vec<String>, geo_json: bool) -> Self {
        let kind = if fields.len() == 2 {
            IndexKind::Geo2
        } else {
            IndexKind::Geo1
        };
        let mut definition = Self::request(kind, fields, false, true);
        definition.geo_json = geo_json && kind == IndexKind::Geo1;
        definition
    }

    /// A fulltext index request.
    #[must_use]
    pub fn fulltext(field: String, min_length: usize) -> Self {
        let mut definition = Self::request(IndexKind::Fulltext, vec![field], false, true);
        definition.min_length = if min_length == 0 {
            DEFAULT_MIN_LENGTH
        } else {
            min_length
        };
        definition
    }

    /// Parses a persisted descriptor.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BadParameter`] for a malformed descriptor
    /// - [`CoreError::NotImplemented`] for an unknown type
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let type_name = value
            .get("type")
            .and_then(Value::as_text)
            .ok_or_else(|| CoreError::bad_parameter("index definition has no type"))?;
        let kind = IndexKind::parse(type_name)
            .ok_or_else(|| CoreError::not_implemented(format!("unknown index type '{type_name}'")))?;

        let id = match value.get("id") {
            Some(Value::Integer(id)) => u64::try_from(*id).ok(),
            Some(Value::Text(id)) => id.parse::<u64>().ok(),
            _ => None,
        }
        .map(IndexId::new)
        .ok_or_else(|| CoreError::bad_parameter("index definition has no valid id"))?;

        let fields: Vec<String> = value
            .get("fields")
            .and_then(Value::as_array)
            .filter(|fields| !fields.is_empty())
            .and_then(|fields| {
                fields
                    .iter()
                    .map(|f| f.as_text().filter(|f| !f.is_empty()).map(str::to_string))
                    .collect()
            })
            .ok_or_else(|| CoreError::bad_parameter("fields must be a non-empty array of strings"))?;

        let flag = |name: &str| -> CoreResult<Option<bool>> {
            match value.get(name) {
                None => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(*b)),
                Some(_) => Err(CoreError::bad_parameter(format!("{name} must be a boolean"))),
            }
        };
        let unique = flag("unique")?.unwrap_or(false);
        // descriptors written before sparsity existed: unique hash indexes were sparse
        let sparse = flag("sparse")?.unwrap_or(unique && kind == IndexKind::Hash);

        let mut definition = Self {
            id: Some(id),
            kind,
            fields,
            unique,
            sparse,
            geo_json: false,
            min_length: DEFAULT_MIN_LENGTH,
        };

        match kind {
            IndexKind::Geo1 => {
                definition.expect_fields(1)?;
                definition.geo_json = flag("geoJson")?.unwrap_or(false);
            }
            IndexKind::Geo2 => definition.expect_fields(2)?,
            IndexKind::Fulltext => {
                definition.expect_fields(1)?;
                definition.min_length = match value.get("minLength") {
                    None => DEFAULT_MIN_LENGTH,
                    Some(v) => v
                        .as_integer()
                        .and_then(|n| usize::try_from(n).ok())
                        .filter(|n| *n > 0)
                        .ok_or_else(|| CoreError::bad_parameter("minLength must be a positive integer"))?,
                };
            }
            _ => {}
        }
        Ok(definition)
    }

    fn expect_fields(&self, count: usize) -> CoreResult<()> {
        if self.fields.len() == count {
            Ok(())
        } else {
            Err(CoreError::bad_parameter(format!(
                "{} index needs exactly {count} field(s)",
                self.kind
            )))
        }
    }

    /// Checks a user request before anything is built.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadParameter`] for an empty or wrongly sized
    /// field list.
    pub fn validate(&self) -> CoreResult<()> {
        if self.fields.is_empty() || self.fields.iter().any(String::is_empty) {
            return Err(CoreError::bad_parameter("fields must be a non-empty array of strings"));
        }
        match self.kind {
            IndexKind::Geo1 | IndexKind::Fulltext => self.expect_fields(1),
            IndexKind::Geo2 => self.expect_fields(2),
            IndexKind::Primary | IndexKind::Edge => Err(CoreError::bad_parameter(format!(
                "cannot create another {} index",
                self.kind
            ))),
            _ => Ok(()),
        }
    }

    /// True if `index` satisfies this request.
    #[must_use]
    pub fn matches(&self, index: &dyn Index) -> bool {
        if index.kind() != self.kind || index.unique() != self.unique || index.sparse() != self.sparse {
            return false;
        }
        let same_fields = if self.kind == IndexKind::Hash {
            let mut wanted = self.fields.clone();
            let mut present = index.fields().to_vec();
            wanted.sort();
            present.sort();
            wanted == present
        } else {
            self.fields == index.fields()
        };
        if !same_fields {
            return false;
        }
        match self.kind {
            IndexKind::Geo1 => index
                .as_any()
                .downcast_ref::<GeoIndex>()
                .is_some_and(|geo| geo.geo_json() == self.geo_json),
            IndexKind::Fulltext => index
                .as_any()
                .downcast_ref::<FulltextIndex>()
                .is_some_and(|ft| ft.min_length() == self.min_length),
            _ => true,
        }
    }

    /// Builds an empty index with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] for primary and edge descriptors,
    /// which are never materialized from storage.
    pub fn instantiate(&self, id: IndexId, buckets: u32) -> CoreResult<Box<dyn Index>> {
        let fields = self.fields.clone();
        Ok(match self.kind {
            IndexKind::Primary | IndexKind::Edge => {
                return Err(CoreError::internal(format!(
                    "{} index cannot be created from a definition",
                    self.kind
                )))
            }
            IndexKind::Hash => Box::new(HashIndex::new(id, fields, self.unique, self.sparse, buckets)),
            IndexKind::Skiplist => Box::new(SkiplistIndex::skiplist(id, fields, self.unique, self.sparse)),
            IndexKind::Persistent => {
                Box::new(SkiplistIndex::persistent(id, fields, self.unique, self.sparse))
            }
            IndexKind::Geo1 => Box::new(GeoIndex::location(id, self.fields[0].clone(), self.geo_json)),
            IndexKind::Geo2 => Box::new(GeoIndex::lat_lon(
                id,
                self.fields[0].clone(),
                self.fields[1].clone(),
            )),
            IndexKind::Fulltext => Box::new(FulltextIndex::new(id, self.fields[0].clone(), self.min_length)),
        })
    }
}

/// The edge index every edge collection carries.
#[must_use]
pub fn edge_index(id: IndexId) -> Box<dyn Index> {
    Box::new(EdgeIndex::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(pairs: Vec<(&str, Value)>) -> Value {
        Value::object(pairs)
    }

    fn fields(names: &[&str]) -> Value {
        Value::Array(names.iter().map(|n| Value::from(*n)).collect())
    }

    #[test]
    fn legacy_unique_hash_is_sparse() {
        let def = IndexDefinition::from_value(&descriptor(vec![
            ("id", Value::from("17")),
            ("type", Value::from("hash")),
            ("fields", fields(&["a"])),
            ("unique", Value::from(true)),
        ]))
        .unwrap();
        assert_eq!(def.id, Some(IndexId::new(17)));
        assert!(def.sparse);

        let def = IndexDefinition::from_value(&descriptor(vec![
            ("id", Value::from(18)),
            ("type", Value::from("skiplist")),
            ("fields", fields(&["a"])),
            ("unique", Value::from(true)),
        ]))
        .unwrap();
        assert!(!def.sparse);
    }

    #[test]
    fn rejects_malformed_descriptors() {
        let no_fields = descriptor(vec![
            ("id", Value::from(1)),
            ("type", Value::from("hash")),
            ("fields", Value::Array(vec![])),
        ]);
        assert!(matches!(
            IndexDefinition::from_value(&no_fields),
            Err(CoreError::BadParameter { .. })
        ));

        let bad_unique = descriptor(vec![
            ("id", Value::from(1)),
            ("type", Value::from("hash")),
            ("fields", fields(&["a"])),
            ("unique", Value::from("yes")),
        ]);
        assert!(IndexDefinition::from_value(&bad_unique).is_err());

        let unknown = descriptor(vec![
            ("id", Value::from(1)),
            ("type", Value::from("bitmap")),
            ("fields", fields(&["a"])),
        ]);
        assert!(matches!(
            IndexDefinition::from_value(&unknown),
            Err(CoreError::NotImplemented { .. })
        ));

        let geo2 = descriptor(vec![
            ("id", Value::from(1)),
            ("type", Value::from("geo2")),
            ("fields", fields(&["lat"])),
        ]);
        assert!(IndexDefinition::from_value(&geo2).is_err());
    }

    #[test]
    fn edge_descriptor_is_internal_error() {
        let def = IndexDefinition::from_value(&descriptor(vec![
            ("id", Value::from(2)),
            ("type", Value::from("edge")),
            ("fields", fields(&["_from", "_to"])),
        ]))
        .unwrap();
        assert!(matches!(
            def.instantiate(IndexId::new(2), 1),
            Err(CoreError::Internal { .. })
        ));
    }

    #[test]
    fn roundtrip_through_index_definition() {
        let request = IndexDefinition::fulltext("body".into(), 4);
        let index = request.instantiate(IndexId::new(30), 1).unwrap();
        let parsed = IndexDefinition::from_value(&index.definition()).unwrap();
        assert_eq!(parsed.kind, IndexKind::Fulltext);
        assert_eq!(parsed.min_length, 4);
        assert!(parsed.matches(index.as_ref()));
    }

    #[test]
    fn hash_fields_match_in_any_order() {
        let index = IndexDefinition::hash(vec!["a".into(), "b".into()], false, false)
            .instantiate(IndexId::new(3), 2)
            .unwrap();
        assert!(IndexDefinition::hash(vec!["b".into(), "a".into()], false, false).matches(index.as_ref()));
        assert!(!IndexDefinition::hash(vec!["a".into()], false, false).matches(index.as_ref()));
        assert!(!IndexDefinition::skiplist(vec!["a".into(), "b".into()], false, false).matches(index.as_ref()));
    }
}
