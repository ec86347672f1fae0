use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    buffers::{ChunkAcker, ChunkId},
    event::{EventTime, Record},
};

pub fn trace_init() {
    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "off".to_string());
    crate::trace::init(false, false, &levels);
}

pub fn record(json: serde_json::Value) -> Record {
    Record::from_json("test.tag", EventTime::new(1_525_132_000, 123_000_000), json)
}

/// Returns a local address with nothing listening on it.
pub fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Outcome reported for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    RolledBack,
}

/// Records every commit and rollback it receives, in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingAcker {
    calls: Arc<Mutex<Vec<(ChunkId, Outcome)>>>,
}

impl RecordingAcker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(ChunkId, Outcome)> {
        self.calls.lock().clone()
    }

    pub fn outcomes(&self, chunk_id: &ChunkId) -> Vec<Outcome> {
        self.calls
            .lock()
            .iter()
            .filter(|(id, _)| id == chunk_id)
            .map(|(_, outcome)| *outcome)
            .collect()
    }

    pub fn committed(&self) -> usize {
        self.count(Outcome::Committed)
    }

    pub fn rolled_back(&self) -> usize {
        self.count(Outcome::RolledBack)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, o)| *o == outcome)
            .count()
    }
}

impl ChunkAcker for RecordingAcker {
    fn commit(&self, chunk_id: &ChunkId) {
        self.calls.lock().push((*chunk_id, Outcome::Committed));
    }

    fn rollback(&self, chunk_id: &ChunkId) {
        self.calls.lock().push((*chunk_id, Outcome::RolledBack));
    }
}
