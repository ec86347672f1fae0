use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::service::HecService;
use crate::{
    buffers::{ChunkAcker, ChunkId},
    internal_events::{
        SplunkAckExpired, SplunkAckIdDisplaced, SplunkAckQueryFailed, SplunkAckRegistered,
        SplunkChunkAcknowledged, SplunkPendingAcksAbandoned,
    },
};

pub const DEFAULT_ACK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AckEntry {
    chunk_id: ChunkId,
    inserted: Instant,
    timeout: Duration,
}

impl AckEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted)
    }
}

/// Chunks resolved by one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub acknowledged: Vec<ChunkId>,
    pub expired: Vec<ChunkId>,
}

/// Tracks chunks that were accepted by HEC but not yet confirmed as indexed.
///
/// Each pending entry ends exactly once: committed when the server reports
/// its ack id as indexed, or rolled back once it has waited longer than its
/// timeout. The lock is only held to copy, insert or remove entries, never
/// across the ack query.
pub struct AckTracker {
    service: HecService,
    acker: Arc<dyn ChunkAcker>,
    interval: Duration,
    pending: Mutex<HashMap<u64, AckEntry>>,
}

impl AckTracker {
    pub fn new(service: HecService, acker: Arc<dyn ChunkAcker>, interval: Duration) -> Self {
        Self {
            service,
            acker,
            interval,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, chunk_id: ChunkId, ack_id: u64, timeout: Duration) {
        let entry = AckEntry {
            chunk_id,
            inserted: Instant::now(),
            timeout,
        };
        let displaced = self.pending.lock().insert(ack_id, entry);
        emit!(SplunkAckRegistered {
            chunk_id: &chunk_id,
            ack_id
        });

        if let Some(displaced) = displaced.filter(|old| old.chunk_id != chunk_id) {
            emit!(SplunkAckIdDisplaced {
                chunk_id: &displaced.chunk_id,
                ack_id
            });
            self.acker.rollback(&displaced.chunk_id);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs one reconciliation pass against the ack endpoint.
    pub async fn reconcile(&self) -> Reconciled {
        let snapshot = self
            .pending
            .lock()
            .iter()
            .map(|(ack_id, entry)| (*ack_id, *entry))
            .collect::<Vec<_>>();
        if snapshot.is_empty() {
            return Reconciled::default();
        }

        let ack_ids = snapshot.iter().map(|(ack_id, _)| *ack_id).collect::<Vec<_>>();
        let statuses = match self.service.query_acks(&ack_ids).await {
            Ok(statuses) => statuses,
            Err(error) => {
                emit!(SplunkAckQueryFailed {
                    error: &error,
                    pending: snapshot.len(),
                });
                return Reconciled::default();
            }
        };

        let now = Instant::now();
        let mut acknowledged = Vec::new();
        let mut expired = Vec::new();
        {
            let mut pending = self.pending.lock();
            for (ack_id, entry) in snapshot {
                // The id may have been re-registered for another chunk while the
                // query was in flight; that entry is not the one we asked about.
                if pending.get(&ack_id) != Some(&entry) {
                    continue;
                }
                if statuses.get(&ack_id).copied().unwrap_or(false) {
                    pending.remove(&ack_id);
                    acknowledged.push((ack_id, entry));
                } else if entry.age(now) > entry.timeout {
                    pending.remove(&ack_id);
                    expired.push((ack_id, entry));
                }
            }
        }

        for (ack_id, entry) in &acknowledged {
            emit!(SplunkChunkAcknowledged {
                chunk_id: &entry.chunk_id,
                ack_id: *ack_id
            });
            self.acker.commit(&entry.chunk_id);
        }
        for (ack_id, entry) in &expired {
            emit!(SplunkAckExpired {
                chunk_id: &entry.chunk_id,
                ack_id: *ack_id,
                age: entry.age(now),
            });
            self.acker.rollback(&entry.chunk_id);
        }

        Reconciled {
            acknowledged: acknowledged.into_iter().map(|(_, entry)| entry.chunk_id).collect(),
            expired: expired.into_iter().map(|(_, entry)| entry.chunk_id).collect(),
        }
    }

    /// Reconciles on a fixed interval until `shutdown` is cancelled. Entries
    /// still pending at that point are abandoned.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.reconcile().await;
                }
            }
        }

        emit!(SplunkPendingAcksAbandoned {
            count: self.pending_count()
        });
    }
}

impl std::fmt::Debug for AckTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckTracker")
            .field("interval", &self.interval)
            .field("pending", &self.pending_count())
            .finish()
    }
}
