//! Construction of stored document objects.
//!
//! Every stored document starts with its system attributes in a fixed order
//! (`_key`, `_id`, `_from`, `_to`, `_rev`) followed by the user attributes.
//! The builders here produce that layout for inserts, replaces, merges and
//! remove tombstones. They never touch indexes or the log.

use std::collections::HashMap;

use docstore_codec::Value;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::collection::is_allowed_collection_name;
use crate::error::{CoreError, CoreResult};
use crate::hlc::{self, HybridLogicalClock};
use crate::key_generator::{is_valid_key, KeyGenerator};
use crate::types::RevisionId;

/// Document key attribute.
pub const KEY: &str = "_key";
/// Document id attribute.
pub const ID: &str = "_id";
/// Edge source attribute.
pub const FROM: &str = "_from";
/// Edge target attribute.
pub const TO: &str = "_to";
/// Revision attribute.
pub const REV: &str = "_rev";

/// True for the attributes the engine owns.
#[must_use]
pub fn is_system_attribute(name: &str) -> bool {
    matches!(name, KEY | ID | FROM | TO | REV)
}

/// 64-bit hash of a document key, stored in the document handle. Stable
/// across builds and platforms.
#[must_use]
pub fn key_hash(key: &str) -> u64 {
    xxh3_64(key.as_bytes())
}

/// Splits `<collection>/<key>` into its parts if both are valid.
#[must_use]
pub fn parse_document_id(text: &str) -> Option<(&str, &str)> {
    let (collection, key) = text.split_once('/')?;
    (is_allowed_collection_name(collection, true) && is_valid_key(key)).then_some((collection, key))
}

/// Returns the edge endpoint stored under `attribute` if it is a valid
/// document id.
///
/// # Errors
///
/// Returns [`CoreError::InvalidEdgeAttribute`] when the attribute is
/// missing, not a string, or not of the form `<collection>/<key>`.
pub fn edge_endpoint<'v>(input: &'v Value, attribute: &'static str) -> CoreResult<&'v Value> {
    match input.get(attribute) {
        Some(value) if value.as_text().and_then(parse_document_id).is_some() => Ok(value),
        _ => Err(CoreError::InvalidEdgeAttribute { attribute }),
    }
}

/// Checks that `attribute` is present and a string, without parsing it.
fn edge_string<'v>(input: &'v Value, attribute: &'static str) -> CoreResult<&'v Value> {
    match input.get(attribute) {
        Some(value) if value.is_text() => Ok(value),
        _ => Err(CoreError::InvalidEdgeAttribute { attribute }),
    }
}

/// Validated edge endpoints of a replace body.
///
/// # Errors
///
/// Returns [`CoreError::InvalidEdgeAttribute`] if either is not a string.
pub fn replace_endpoints(input: &Value) -> CoreResult<(Value, Value)> {
    Ok((edge_string(input, FROM)?.clone(), edge_string(input, TO)?.clone()))
}

/// Everything the insert builder needs from its collection.
#[derive(Debug)]
pub struct InsertContext<'a> {
    /// Value stored as `_id`.
    pub id: i64,
    /// Key generator of the collection.
    pub key_generator: &'a dyn KeyGenerator,
    /// Clock for revisions and key ticks.
    pub clock: &'a HybridLogicalClock,
    /// Validated `(_from, _to)` for edge collections.
    pub endpoints: Option<(Value, Value)>,
    /// Restore mode keeps client-supplied revisions.
    pub is_restore: bool,
}

/// Builds the stored object for an insert.
///
/// # Errors
///
/// - [`CoreError::OutOfKeys`] if a key must be generated and none is left
/// - [`CoreError::InvalidKey`] for a non-string or rejected `_key`
/// - [`CoreError::InvalidRevision`] for a non-string `_rev` in restore mode
pub fn new_object_for_insert(ctx: &InsertContext<'_>, input: &Value) -> CoreResult<(Value, RevisionId)> {
    let key = match input.get(KEY) {
        None => ctx
            .key_generator
            .generate(ctx.clock.next())
            .ok_or(CoreError::OutOfKeys)?,
        Some(Value::Text(key)) => {
            ctx.key_generator.validate(key, ctx.is_restore)?;
            key.clone()
        }
        Some(other) => return Err(CoreError::invalid_key(format!("{other:?}"))),
    };

    let revision = if ctx.is_restore {
        restored_revision(input, ctx.clock)?
    } else {
        ctx.clock.next_revision()
    };

    let mut pairs = vec![(KEY, Value::Text(key)), (ID, Value::Integer(ctx.id))];
    if let Some((from, to)) = &ctx.endpoints {
        pairs.push((FROM, from.clone()));
        pairs.push((TO, to.clone()));
    }
    pairs.push((REV, Value::Text(revision.to_string())));

    let mut object = Value::object(pairs);
    append_user_attributes(&mut object, input);
    Ok((object, revision))
}

/// Revision for an update or replace.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRevision`] in restore mode when `_rev` is
/// not a usable string.
pub fn revision_for_write(input: &Value, is_restore: bool, clock: &HybridLogicalClock) -> CoreResult<RevisionId> {
    if is_restore {
        restored_revision(input, clock)
    } else {
        Ok(clock.next_revision())
    }
}

/// Revision for a remove tombstone. A missing or malformed `_rev` in
/// restore mode gets a fresh value instead of an error.
#[must_use]
pub fn revision_for_remove(input: &Value, is_restore: bool, clock: &HybridLogicalClock) -> RevisionId {
    if is_restore && input.get(REV).is_some_and(Value::is_text) {
        if let Ok(revision) = restored_revision(input, clock) {
            return revision;
        }
    }
    clock.next_revision()
}

fn restored_revision(input: &Value, clock: &HybridLogicalClock) -> CoreResult<RevisionId> {
    let Some(text) = input.get(REV).and_then(Value::as_text) else {
        return Err(CoreError::InvalidRevision {
            message: "_rev must be a string in restore mode".to_string(),
        });
    };
    match hlc::parse_revision(text) {
        Some(parsed) if parsed.legacy => {
            warn!(revision = text, "replacing legacy revision with a fresh one");
            Ok(clock.next_revision())
        }
        Some(parsed) => {
            clock.observe(parsed.revision.as_u64());
            Ok(parsed.revision)
        }
        None => Err(CoreError::InvalidRevision {
            message: format!("cannot parse revision '{text}'"),
        }),
    }
}

fn append_user_attributes(target: &mut Value, source: &Value) {
    if let (Value::Map(out), Some(entries)) = (target, source.as_map()) {
        out.extend(
            entries
                .iter()
                .filter(|(k, _)| !k.as_text().is_some_and(is_system_attribute))
                .cloned(),
        );
    }
}

/// Builds the stored object for a replace: identity from `old`, endpoints
/// and user attributes from the new body.
#[must_use]
pub fn new_object_for_replace(
    old: &Value,
    new: &Value,
    endpoints: Option<(Value, Value)>,
    revision: RevisionId,
) -> Value {
    let mut pairs = vec![
        (KEY, old.get(KEY).cloned().unwrap_or(Value::Null)),
        (ID, old.get(ID).cloned().unwrap_or(Value::Null)),
    ];
    if let Some((from, to)) = endpoints {
        pairs.push((FROM, from));
        pairs.push((TO, to));
    }
    pairs.push((REV, Value::Text(revision.to_string())));
    let mut object = Value::object(pairs);
    append_user_attributes(&mut object, new);
    object
}

/// Options controlling [`merge_objects_for_update`].
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Merge nested objects instead of replacing them.
    pub merge_objects: bool,
    /// Keep attributes whose new value is null.
    pub keep_null: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            merge_objects: true,
            keep_null: true,
        }
    }
}

/// Merges a patch into the stored object.
///
/// User attributes of `old` keep their position and take the new value when
/// the patch has one. With `keep_null` off a null in the patch removes the
/// attribute. Attributes only present in the patch are appended in patch
/// order.
#[must_use]
pub fn merge_objects_for_update(
    old: &Value,
    new: &Value,
    is_edge: bool,
    revision: RevisionId,
    options: MergeOptions,
) -> Value {
    let mut from = None;
    let mut to = None;
    let mut patch: Vec<(&str, Option<&Value>)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (name, value) in new.entries() {
        match name {
            FROM => from = Some(value),
            TO => to = Some(value),
            KEY | ID | REV => {}
            _ => {
                positions.insert(name, patch.len());
                patch.push((name, Some(value)));
            }
        }
    }

    let mut pairs: Vec<(String, Value)> = vec![
        (KEY.to_string(), old.get(KEY).cloned().unwrap_or(Value::Null)),
        (ID.to_string(), old.get(ID).cloned().unwrap_or(Value::Null)),
    ];
    if is_edge {
        let from = from.or_else(|| old.get(FROM)).cloned().unwrap_or(Value::Null);
        let to = to.or_else(|| old.get(TO)).cloned().unwrap_or(Value::Null);
        pairs.push((FROM.to_string(), from));
        pairs.push((TO.to_string(), to));
    }
    pairs.push((REV.to_string(), Value::Text(revision.to_string())));

    for (name, old_value) in old.entries() {
        if is_system_attribute(name) {
            continue;
        }
        let Some(slot) = positions.get(name).map(|i| &mut patch[*i].1) else {
            pairs.push((name.to_string(), old_value.clone()));
            continue;
        };
        let Some(new_value) = slot.take() else {
            continue;
        };
        if !options.keep_null && new_value.is_null() {
            continue;
        }
        let merged = if options.merge_objects && old_value.is_object() && new_value.is_object() {
            merge_values(old_value, new_value, !options.keep_null)
        } else {
            new_value.clone()
        };
        pairs.push((name.to_string(), merged));
    }

    for (name, value) in patch {
        let Some(value) = value else { continue };
        if !options.keep_null && value.is_null() {
            continue;
        }
        pairs.push((name.to_string(), value.clone()));
    }

    Value::object(pairs)
}

/// Recursive object merge. Nulls in `new` delete when `null_means_remove`.
#[must_use]
pub fn merge_values(old: &Value, new: &Value, null_means_remove: bool) -> Value {
    let mut pairs: Vec<(String, Value)> = Vec::new();
    for (name, old_value) in old.entries() {
        match new.get(name) {
            None => pairs.push((name.to_string(), old_value.clone())),
            Some(new_value) if new_value.is_null() && null_means_remove => {}
            Some(new_value) if old_value.is_object() && new_value.is_object() => {
                pairs.push((name.to_string(), merge_values(old_value, new_value, null_means_remove)));
            }
            Some(new_value) => pairs.push((name.to_string(), new_value.clone())),
        }
    }
    for (name, new_value) in new.entries() {
        if old.get(name).is_some() || (null_means_remove && new_value.is_null()) {
            continue;
        }
        pairs.push((name.to_string(), new_value.clone()));
    }
    Value::object(pairs)
}

/// Key addressed by a remove call: a bare string or an object's `_key`.
///
/// # Errors
///
/// Returns [`CoreError::DocumentHandleBad`] when no key can be found and
/// [`CoreError::InvalidKey`] when `_key` is not a string.
pub fn key_of(input: &Value) -> CoreResult<&str> {
    match input {
        Value::Text(key) => Ok(key),
        Value::Map(_) => match input.get(KEY) {
            Some(Value::Text(key)) => Ok(key),
            Some(other) => Err(CoreError::invalid_key(format!("{other:?}"))),
            None => Err(CoreError::DocumentHandleBad),
        },
        _ => Err(CoreError::DocumentHandleBad),
    }
}

/// Tombstone written for a remove: `{_key, _rev}`.
#[must_use]
pub fn new_object_for_remove(key: &str, revision: RevisionId) -> Value {
    Value::object([
        (KEY, Value::from(key)),
        (REV, Value::Text(revision.to_string())),
    ])
}

/// Compares a caller-supplied `_rev` against the stored revision.
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if `expected` is present and differs.
pub fn check_revision(key: &str, expected: Option<&Value>, current: RevisionId) -> CoreResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let current = current.to_string();
    if expected.as_text() == Some(current.as_str()) {
        return Ok(());
    }
    Err(CoreError::Conflict {
        key: key.to_string(),
        expected: expected
            .as_text()
            .map_or_else(|| format!("{expected:?}"), str::to_string),
        actual: current,
    })
}
