//! In-flight request deduplication
//!
//! Maps request fingerprints to the broadcaster of the request currently
//! being served. The first arrival for a fingerprint becomes the leader and
//! does the upstream work; later arrivals attach to the same broadcaster.
//! Entries live exactly as long as the broadcaster, with one exception: a
//! stream that ended in a mid-stream error is retained for a configured
//! window so clients that auto-retry on SSE errors observe the same error
//! instead of stampeding the upstream.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::broadcast::Broadcaster;
use crate::fingerprint::Fingerprint;

/// Result of a table lookup-or-insert
pub enum JoinOutcome {
    /// Caller installed the entry and must run the upstream call
    Leader(Arc<Broadcaster>),
    /// Caller attached to an existing in-flight broadcaster
    Follower(Arc<Broadcaster>),
}

/// Process-wide table of in-flight requests
///
/// One per running server, passed by explicit construction.
pub struct DedupTable {
    entries: DashMap<Fingerprint, Arc<Broadcaster>>,
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Join the in-flight entry for a fingerprint, or become its leader
    ///
    /// The entry API makes racing leaders collapse onto one: whichever
    /// insert wins, the loser attaches as a follower.
    pub fn join_or_lead(&self, fingerprint: &Fingerprint) -> JoinOutcome {
        match self.entries.entry(fingerprint.clone()) {
            Entry::Occupied(entry) => JoinOutcome::Follower(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let broadcaster = Broadcaster::new();
                entry.insert(Arc::clone(&broadcaster));
                JoinOutcome::Leader(broadcaster)
            }
        }
    }

    /// Retire a completed leader's entry
    ///
    /// Completion and non-stream errors remove the entry immediately. A
    /// mid-stream error (`was_streaming` with published bytes) keeps it
    /// joinable for `sse_error_retention` before removal.
    pub fn finish(self: &Arc<Self>, fingerprint: &Fingerprint, was_streaming: bool, sse_error_retention: Duration) {
        let Some(broadcaster) = self.entries.get(fingerprint).map(|e| Arc::clone(e.value())) else {
            return;
        };

        let retain = was_streaming && broadcaster.closed_with_error() && broadcaster.has_published();
        if !retain {
            self.remove_if_same(fingerprint, &broadcaster);
            return;
        }

        tracing::debug!(
            fingerprint = %fingerprint,
            retention_secs = sse_error_retention.as_secs(),
            "retaining errored stream entry for duplicate arrivals"
        );

        let table = Arc::clone(self);
        let fingerprint = fingerprint.clone();
        tokio::spawn(async move {
            tokio::time::sleep(sse_error_retention).await;
            table.remove_if_same(&fingerprint, &broadcaster);
        });
    }

    /// Number of in-flight entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a fingerprint currently has an in-flight entry
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Remove only if the entry still maps to the given broadcaster; a new
    /// leader may have replaced it while a retention timer was pending
    fn remove_if_same(&self, fingerprint: &Fingerprint, broadcaster: &Arc<Broadcaster>) {
        self.entries
            .remove_if(fingerprint, |_, existing| Arc::ptr_eq(existing, broadcaster));
    }
}
