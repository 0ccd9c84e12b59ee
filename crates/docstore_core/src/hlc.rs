//! Hybrid logical clock for revisions and ticks.
//!
//! A value is `(milliseconds since epoch << 20) | counter`. The clock never
//! goes backwards: when the wall clock stalls or moves back, the counter part
//! is incremented instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::RevisionId;

const LOGICAL_BITS: u32 = 20;

const ALPHABET: &[u8; 64] = b"-_ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Process-wide hybrid logical clock.
#[derive(Debug, Default)]
pub struct HybridLogicalClock {
    last: AtomicU64,
}

impl HybridLogicalClock {
    /// Creates a clock starting at the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a value strictly greater than any value returned or observed
    /// before.
    pub fn next(&self) -> u64 {
        let physical = physical_now() << LOGICAL_BITS;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if physical > current {
                physical
            } else {
                current + 1
            };
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns a fresh revision id.
    pub fn next_revision(&self) -> RevisionId {
        RevisionId::new(self.next())
    }

    /// Moves the clock past `value`, e.g. a restored revision.
    pub fn observe(&self, value: u64) {
        self.last.fetch_max(value, Ordering::AcqRel);
    }

    /// Last value handed out or observed.
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn physical_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Renders a clock value in the revision alphabet.
#[must_use]
pub fn encode(mut value: u64) -> String {
    if value == 0 {
        return "-".to_string();
    }
    let mut buf = Vec::with_capacity(11);
    while value > 0 {
        buf.push(ALPHABET[(value & 0x3f) as usize]);
        value >>= 6;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

/// Parses a value rendered by [`encode`].
#[must_use]
pub fn decode(text: &str) -> Option<u64> {
    if text.is_empty() || text.len() > 11 {
        return None;
    }
    text.bytes().try_fold(0u64, |acc, byte| {
        let digit = ALPHABET.iter().position(|c| *c == byte)? as u64;
        acc.checked_mul(64)?.checked_add(digit)
    })
}

/// A parsed revision string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRevision {
    /// The numeric value.
    pub revision: RevisionId,
    /// True for legacy decimal revisions.
    pub legacy: bool,
}

/// Parses a revision string.
///
/// Strings starting with `1`-`9` are legacy decimal ids; everything else
/// is decoded with the clock alphabet.
#[must_use]
pub fn parse_revision(text: &str) -> Option<ParsedRevision> {
    let first = text.bytes().next()?;
    if (b'1'..=b'9').contains(&first) {
        let value = text.parse::<u64>().ok()?;
        return Some(ParsedRevision {
            revision: RevisionId::new(value),
            legacy: true,
        });
    }
    decode(text).map(|value| ParsedRevision {
        revision: RevisionId::new(value),
        legacy: false,
    })
}
