//! In-flight request tracking.
//!
//! The connection task owns the socket; callers park on a oneshot here and
//! the task resolves it when the matching `seq` comes back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

struct PendingEntry {
    opcode: u16,
    created_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

/// One ticket per outstanding request.
pub(crate) struct PendingTicket {
    pub(crate) seq: u64,
    pub(crate) rx: oneshot::Receiver<Result<Value>>,
}

/// Table of requests awaiting their response frame.
pub(crate) struct PendingTable {
    next_seq: AtomicU64,
    entries: Mutex<HashMap<u64, PendingEntry>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Next sequence number. Monotonic for the life of the client, never
    /// reset across reconnects.
    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Register an in-flight request under a fresh seq.
    pub(crate) fn allocate(&self, opcode: u16) -> PendingTicket {
        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            seq,
            PendingEntry {
                opcode,
                created_at: Instant::now(),
                tx,
            },
        );
        PendingTicket { seq, rx }
    }

    /// Deliver a successful response. False when the seq is unknown, which
    /// happens after a timeout already evicted the entry.
    pub(crate) fn resolve(&self, seq: u64, payload: Value) -> bool {
        self.complete(seq, Ok(payload))
    }

    /// Deliver an error response.
    pub(crate) fn fail(&self, seq: u64, error: Error) -> bool {
        self.complete(seq, Err(error))
    }

    fn complete(&self, seq: u64, outcome: Result<Value>) -> bool {
        let Some(entry) = self.entries.lock().remove(&seq) else {
            return false;
        };
        // The caller may have given up; a dropped receiver is fine.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Forget a request, e.g. after its caller timed out.
    pub(crate) fn remove(&self, seq: u64) -> bool {
        self.entries.lock().remove(&seq).is_some()
    }

    /// Fail every outstanding request with a clone of `error`. Used when
    /// the connection drops. Returns how many were cancelled.
    pub(crate) fn cancel_all(&self, error: Error) -> usize {
        let drained: Vec<(u64, PendingEntry)> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (seq, entry) in drained {
            tracing::debug!(
                seq,
                opcode = entry.opcode,
                age_ms = entry.created_at.elapsed().as_millis() as u64,
                "cancelling in-flight request"
            );
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }
}
