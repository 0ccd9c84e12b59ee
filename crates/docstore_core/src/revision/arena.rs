use std::fmt;
use std::sync::Arc;

use docstore_codec::{from_document_bytes, DocumentSlice, Value};

use crate::document::KEY;
use crate::error::{CoreError, CoreResult};
use crate::types::{FileId, RevisionId, Tick};

/// Stable identity of an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(usize);

impl HandleId {
    /// Handle for slot `index`.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.0)
    }
}

/// Location and metadata of the visible revision of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentHandle {
    /// Hash of the document key.
    pub hash: u64,
    /// Segment holding the marker.
    pub fid: FileId,
    /// Offset of the marker within the segment.
    pub offset: u64,
    /// Tick of the marker.
    pub tick: Tick,
    /// Encoded size of the marker.
    pub marker_size: u64,
    /// Revision of the document.
    pub revision: RevisionId,
    /// Encoded document body, shared with the log cache.
    pub body: Option<Arc<[u8]>>,
}

impl DocumentHandle {
    /// Path-addressable view of the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle has no body or it is not an object.
    pub fn slice(&self) -> CoreResult<DocumentSlice<'_>> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| CoreError::internal("document handle without body"))?;
        Ok(DocumentSlice::new(body)?)
    }

    /// Fully decoded body.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle has no body or it cannot be decoded.
    pub fn to_value(&self) -> CoreResult<Value> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| CoreError::internal("document handle without body"))?;
        Ok(from_document_bytes(body)?)
    }

    /// The `_key` of the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is missing or has no string key.
    pub fn key(&self) -> CoreResult<String> {
        self.slice()?
            .get_str(KEY)?
            .map(str::to_string)
            .ok_or_else(|| CoreError::internal("stored document without _key"))
    }

    /// Size of the body in bytes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_deref().map_or(0, <[u8]>::len)
    }
}

/// Snapshot of arena occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Handles in use.
    pub live: usize,
    /// Released slots waiting for reuse.
    pub free: usize,
    /// Approximate bytes held by slots and bodies.
    pub memory: usize,
}

/// Reusable storage for document handles.
///
/// Released slots go to a free list and come back zeroed, so a reused id
/// never carries the previous document's location.
pub struct RevisionArena {
    slots: Vec<Option<DocumentHandle>>,
    free: Vec<usize>,
    capacity: usize,
    body_bytes: usize,
}

impl RevisionArena {
    /// Creates an arena that refuses to hold more than `capacity` handles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            body_bytes: 0,
        }
    }

    /// Allocates a zeroed handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfMemory`] when the capacity is exhausted.
    pub fn request(&mut self) -> CoreResult<HandleId> {
        if self.len() >= self.capacity {
            return Err(CoreError::out_of_memory(format!(
                "revision arena is full ({} handles)",
                self.capacity
            )));
        }
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(DocumentHandle::default());
            return Ok(HandleId(index));
        }
        self.slots.push(Some(DocumentHandle::default()));
        Ok(HandleId(self.slots.len() - 1))
    }

    /// The handle in slot `id`, if live.
    #[must_use]
    pub fn get(&self, id: HandleId) -> Option<&DocumentHandle> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Replaces the content of a live handle and returns the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] if `id` is not live.
    pub fn replace(&mut self, id: HandleId, handle: DocumentHandle) -> CoreResult<DocumentHandle> {
        let slot = self
            .slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| CoreError::internal(format!("{id} is not allocated")))?;
        self.body_bytes = self.body_bytes + handle.body_len() - slot.body_len();
        Ok(std::mem::replace(slot, handle))
    }

    /// Returns a handle to the free list.
    pub fn release(&mut self, id: HandleId) -> Option<DocumentHandle> {
        let previous = self.slots.get_mut(id.0)?.take()?;
        self.body_bytes -= previous.body_len();
        self.free.push(id.0);
        Some(previous)
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True if no handle is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate memory held by the arena.
    #[must_use]
    pub fn memory(&self) -> usize {
        self.slots.len() * std::mem::size_of::<Option<DocumentHandle>>() + self.body_bytes
    }

    /// Occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            live: self.len(),
            free: self.free.len(),
            memory: self.memory(),
        }
    }
}

impl fmt::Debug for RevisionArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionArena")
            .field("live", &self.len())
            .field("free", &self.free.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
