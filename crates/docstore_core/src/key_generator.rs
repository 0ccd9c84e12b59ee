//! Document key generators.
//!
//! A collection owns one generator built from its `keyOptions`. The
//! generator hands out keys for documents inserted without `_key`, checks
//! user-supplied keys, and is told about every key seen during replay so
//! that generated keys never collide with existing ones.

use std::fmt;

use docstore_codec::Value;
use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};

/// Longest accepted key in bytes.
pub const MAX_KEY_LENGTH: usize = 254;

/// Produces and validates document keys.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Generates a key. `tick` is a fresh clock value the generator may use.
    ///
    /// Returns `None` when the key space is exhausted.
    fn generate(&self, tick: u64) -> Option<String>;

    /// Checks a user-supplied key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for malformed keys and for user keys
    /// when user keys are not allowed outside restore.
    fn validate(&self, key: &str, is_restore: bool) -> CoreResult<()>;

    /// Records a key seen during replay.
    fn track(&self, key: &str);

    /// Serializes the generator options.
    fn to_value(&self) -> Value;
}

/// Builds a generator from a `keyOptions` object.
///
/// # Errors
///
/// Returns [`CoreError::BadParameter`] for unknown generator types or
/// out-of-range increment/offset values.
pub fn from_options(options: Option<&Value>) -> CoreResult<Box<dyn KeyGenerator>> {
    let Some(options) = options.filter(|v| v.is_object()) else {
        return Ok(Box::new(TraditionalKeyGenerator::new(true)));
    };

    let allow_user_keys = options
        .get("allowUserKeys")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    match options.get("type").and_then(Value::as_text).unwrap_or("traditional") {
        "traditional" => Ok(Box::new(TraditionalKeyGenerator::new(allow_user_keys))),
        "autoincrement" => {
            let increment = read_u64(options, "increment", 1)?;
            if increment == 0 || increment >= 1 << 16 {
                return Err(CoreError::bad_parameter(
                    "increment value must be greater than zero and smaller than 65536",
                ));
            }
            let offset = read_u64(options, "offset", 0)?;
            Ok(Box::new(AutoIncrementKeyGenerator::new(
                allow_user_keys,
                increment,
                offset,
            )))
        }
        other => Err(CoreError::bad_parameter(format!(
            "invalid key generator type '{other}'"
        ))),
    }
}

fn read_u64(options: &Value, name: &str, default: u64) -> CoreResult<u64> {
    match options.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| CoreError::bad_parameter(format!("{name} must be a non-negative integer"))),
    }
}

/// True if `key` consists only of allowed characters and has a valid length.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && key.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'_' | b'-' | b':' | b'.' | b'@' | b'(' | b')' | b'+' | b',' | b'='
                        | b';' | b'$' | b'!' | b'*' | b'\'' | b'%'
                )
        })
}

/// Uses the insert tick as the key.
#[derive(Debug)]
pub struct TraditionalKeyGenerator {
    allow_user_keys: bool,
}

impl TraditionalKeyGenerator {
    /// Creates the generator.
    #[must_use]
    pub const fn new(allow_user_keys: bool) -> Self {
        Self { allow_user_keys }
    }
}

impl KeyGenerator for TraditionalKeyGenerator {
    fn generate(&self, tick: u64) -> Option<String> {
        (tick != 0).then(|| tick.to_string())
    }

    fn validate(&self, key: &str, is_restore: bool) -> CoreResult<()> {
        if !is_restore && !self.allow_user_keys {
            return Err(CoreError::invalid_key(key));
        }
        if !is_valid_key(key) {
            return Err(CoreError::invalid_key(key));
        }
        Ok(())
    }

    fn track(&self, _key: &str) {}

    fn to_value(&self) -> Value {
        Value::object([
            ("type", Value::from("traditional")),
            ("allowUserKeys", Value::from(self.allow_user_keys)),
        ])
    }
}

/// Hands out numeric keys `offset, offset + increment, ...`.
#[derive(Debug)]
pub struct AutoIncrementKeyGenerator {
    allow_user_keys: bool,
    increment: u64,
    offset: u64,
    last_value: Mutex<u64>,
}

impl AutoIncrementKeyGenerator {
    /// Creates the generator.
    #[must_use]
    pub fn new(allow_user_keys: bool, increment: u64, offset: u64) -> Self {
        Self {
            allow_user_keys,
            increment: increment.max(1),
            offset,
            last_value: Mutex::new(0),
        }
    }

    /// The highest key value handed out or seen.
    #[must_use]
    pub fn last_value(&self) -> u64 {
        *self.last_value.lock()
    }

    fn bump(&self, value: u64) {
        let mut last = self.last_value.lock();
        if value > *last {
            *last = value;
        }
    }
}

impl KeyGenerator for AutoIncrementKeyGenerator {
    fn generate(&self, _tick: u64) -> Option<String> {
        let mut last = self.last_value.lock();
        let next = if *last < self.offset {
            self.offset.max(1)
        } else {
            let step = self.increment - ((*last - self.offset) % self.increment);
            last.checked_add(step)?
        };
        *last = next;
        Some(next.to_string())
    }

    fn validate(&self, key: &str, is_restore: bool) -> CoreResult<()> {
        if !is_restore && !self.allow_user_keys {
            return Err(CoreError::invalid_key(key));
        }
        if key.is_empty() || key.len() > MAX_KEY_LENGTH || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::invalid_key(key));
        }
        let value = key.parse::<u64>().map_err(|_| CoreError::invalid_key(key))?;
        self.bump(value);
        Ok(())
    }

    fn track(&self, key: &str) {
        if let Ok(value) = key.parse::<u64>() {
            self.bump(value);
        }
    }

    fn to_value(&self) -> Value {
        Value::object([
            ("type", Value::from("autoincrement")),
            ("allowUserKeys", Value::from(self.allow_user_keys)),
            ("offset", Value::Integer(i64::try_from(self.offset).unwrap_or(i64::MAX))),
            ("increment", Value::Integer(i64::try_from(self.increment).unwrap_or(i64::MAX))),
        ])
    }
}
