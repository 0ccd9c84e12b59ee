//! Full-text index implementation.
//!
//! Words are extracted from one attribute (a string, an array of strings or
//! the string values of an object) and mapped to document handles.
//! Removals are lazy: the handle leaves the forward map right away and its
//! words are queued as garbage, which [`Index::cleanup`] purges. The queue
//! is also purged once it reaches [`GARBAGE_LIMIT`] entries and when the
//! collection unloads. Lookups filter out handles whose current words no
//! longer contain the term.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};

use docstore_codec::Value;

use crate::error::CoreResult;
use crate::index::traits::{base_definition, not_indexed, split_paths, Index, IndexKind, IndexedDocument};
use crate::revision::HandleId;
use crate::types::IndexId;

/// Default minimum word length.
pub const DEFAULT_MIN_LENGTH: usize = 2;

/// Queued removals that trigger a purge on the next remove.
pub const GARBAGE_LIMIT: usize = 1024;

/// Configuration for the word tokenizer.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Minimum word length to index.
    pub min_token_length: usize,
    /// Maximum word length to index.
    pub max_token_length: usize,
    /// Whether words are lowercased.
    pub case_insensitive: bool,
    /// Additional characters to treat as separators.
    pub extra_separators: Vec<char>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_token_length: DEFAULT_MIN_LENGTH,
            max_token_length: 40,
            case_insensitive: true,
            extra_separators: vec![],
        }
    }
}

impl TokenizerConfig {
    /// Sets minimum word length.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_token_length = len;
        self
    }

    /// Adds extra separator characters.
    #[must_use]
    pub fn with_separators(mut self, chars: &[char]) -> Self {
        self.extra_separators.extend_from_slice(chars);
        self
    }

    /// Splits `text` into normalized words.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| {
            c.is_whitespace() || c.is_ascii_punctuation() || self.extra_separators.contains(&c)
        })
        .filter(|word| {
            let len = word.chars().count();
            len >= self.min_token_length && len <= self.max_token_length
        })
        .map(|word| {
            if self.case_insensitive {
                word.to_lowercase()
            } else {
                word.to_string()
            }
        })
        .collect()
    }
}

/// Word index over one attribute.
#[derive(Debug)]
pub struct FulltextIndex {
    id: IndexId,
    fields: Vec<String>,
    path: Vec<String>,
    tokenizer: TokenizerConfig,
    words: HashMap<String, HashSet<HandleId>>,
    doc_words: HashMap<HandleId, BTreeSet<String>>,
    garbage: Vec<(HandleId, BTreeSet<String>)>,
}

impl FulltextIndex {
    /// Creates an index over `field` ignoring words shorter than `min_length`.
    #[must_use]
    pub fn new(id: IndexId, field: String, min_length: usize) -> Self {
        let fields = vec![field];
        let path = split_paths(&fields).remove(0);
        Self {
            id,
            fields,
            path,
            tokenizer: TokenizerConfig::default().min_length(min_length.max(1)),
            words: HashMap::new(),
            doc_words: HashMap::new(),
            garbage: Vec::new(),
        }
    }

    /// Minimum indexed word length.
    #[must_use]
    pub fn min_length(&self) -> usize {
        self.tokenizer.min_token_length
    }

    /// Removals waiting for cleanup.
    #[must_use]
    pub fn garbage_len(&self) -> usize {
        self.garbage.len()
    }

    fn words_of(&self, doc: &Value) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let Some(value) = doc.get_path(&self.path) else {
            return out;
        };
        let mut add = |text: &str| out.extend(self.tokenizer.tokenize(text));
        match value {
            Value::Text(text) => add(text.as_str()),
            Value::Array(items) => items.iter().filter_map(Value::as_text).for_each(&mut add),
            Value::Map(pairs) => pairs
                .iter()
                .filter_map(|(_, v)| v.as_text())
                .for_each(&mut add),
            _ => {}
        }
        out
    }

    fn current(&self, handle: HandleId, word: &str) -> bool {
        self.doc_words
            .get(&handle)
            .is_some_and(|words| words.contains(word))
    }

    /// Documents containing every word of `query`.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<HandleId> {
        let terms = self.tokenizer.tokenize(query);
        let Some((first, rest)) = terms.split_first() else {
            return Vec::new();
        };
        let mut hits: BTreeSet<HandleId> = match self.words.get(first) {
            Some(handles) => handles
                .iter()
                .copied()
                .filter(|h| self.current(*h, first))
                .collect(),
            None => return Vec::new(),
        };
        for term in rest {
            hits.retain(|h| self.current(*h, term));
        }
        hits.into_iter().collect()
    }

    /// Documents containing a word that starts with `prefix`.
    #[must_use]
    pub fn search_prefix(&self, prefix: &str) -> Vec<HandleId> {
        let prefix = if self.tokenizer.case_insensitive {
            prefix.to_lowercase()
        } else {
            prefix.to_string()
        };
        let hits: BTreeSet<HandleId> = self
            .words
            .iter()
            .filter(|(word, _)| word.starts_with(&prefix))
            .flat_map(|(word, handles)| handles.iter().filter(move |h| self.current(**h, word)))
            .copied()
            .collect();
        hits.into_iter().collect()
    }
}

impl Index for FulltextIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Fulltext
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn sparse(&self) -> bool {
        true
    }

    fn has_cleanup(&self) -> bool {
        true
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>, _is_rollback: bool) -> CoreResult<()> {
        let words = self.words_of(doc.value);
        if words.is_empty() {
            return Ok(());
        }
        for word in &words {
            self.words.entry(word.clone()).or_default().insert(doc.handle);
        }
        self.doc_words.insert(doc.handle, words);
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        match self.doc_words.remove(&doc.handle) {
            Some(words) => {
                self.garbage.push((doc.handle, words));
                if self.garbage.len() >= GARBAGE_LIMIT {
                    self.cleanup()?;
                }
                Ok(())
            }
            None if is_rollback || self.words_of(doc.value).is_empty() => Ok(()),
            None => Err(not_indexed(self.id, doc.handle)),
        }
    }

    fn cleanup(&mut self) -> CoreResult<()> {
        for (handle, words) in std::mem::take(&mut self.garbage) {
            for word in words {
                if self.current(handle, &word) {
                    continue;
                }
                if let Some(handles) = self.words.get_mut(&word) {
                    handles.remove(&handle);
                    if handles.is_empty() {
                        self.words.remove(&word);
                    }
                }
            }
        }
        Ok(())
    }

    fn memory(&self) -> usize {
        let words: usize = self
            .words
            .iter()
            .map(|(w, h)| w.capacity() + h.len() * std::mem::size_of::<HandleId>())
            .sum();
        let forward: usize = self
            .doc_words
            .values()
            .chain(self.garbage.iter().map(|(_, w)| w))
            .map(|w| w.iter().map(String::capacity).sum::<usize>())
            .sum();
        words + forward
    }

    fn len(&self) -> usize {
        self.doc_words.len()
    }

    fn lookup(&self, values: &[Value]) -> Vec<HandleId> {
        values
            .first()
            .and_then(Value::as_text)
            .map(|query| self.search(query))
            .unwrap_or_default()
    }

    fn clear(&mut self) {
        self.words.clear();
        self.doc_words.clear();
        self.garbage.clear();
    }

    fn definition(&self) -> Value {
        let mut def = base_definition(self.id, IndexKind::Fulltext, &self.fields, false, true);
        let min_length = i64::try_from(self.tokenizer.min_token_length).unwrap_or(i64::MAX);
        def.set("minLength", Value::Integer(min_length));
        def
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
