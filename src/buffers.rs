use std::{fmt, sync::Arc};

use bytes::Bytes;
use uuid::Uuid;

/// Unique identifier of a buffered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(Uuid);

impl ChunkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// An immutable batch of serialized payloads owned by the host buffer.
///
/// The body is sent as a single request; it is never split or modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: ChunkId,
    body: Bytes,
}

impl Chunk {
    pub fn new(id: ChunkId, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    pub const fn id(&self) -> &ChunkId {
        &self.id
    }

    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Callbacks into the host buffer that owns the chunks.
///
/// `commit` tells the buffer a chunk was delivered and may be discarded;
/// `rollback` tells it the chunk was not confirmed and must be retried. For a
/// given chunk the core calls at most one of them, at most once.
pub trait ChunkAcker: Send + Sync + 'static {
    fn commit(&self, chunk_id: &ChunkId);

    fn rollback(&self, chunk_id: &ChunkId);
}

impl<T: ChunkAcker + ?Sized> ChunkAcker for Arc<T> {
    fn commit(&self, chunk_id: &ChunkId) {
        (**self).commit(chunk_id)
    }

    fn rollback(&self, chunk_id: &ChunkId) {
        (**self).rollback(chunk_id)
    }
}

/// An acker for hosts that do not track chunk outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAcker;

impl ChunkAcker for NullAcker {
    fn commit(&self, _chunk_id: &ChunkId) {}

    fn rollback(&self, _chunk_id: &ChunkId) {}
}
