// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline counters, shared by the sessions, the dispatch loop and the
//! HTTP stats endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Connections accepted by the listener.
    pub connections_accepted: AtomicU64,

    /// Sessions currently running.
    pub sessions_active: AtomicU64,

    /// Sessions refused during CONNECT (bad credentials).
    pub sessions_rejected: AtomicU64,

    /// PUBLISH packets received from authenticated sessions.
    pub messages_received: AtomicU64,

    /// Publishes dropped because the topic was not allowed.
    pub messages_unauthorized: AtomicU64,

    /// Publishes dropped because the buffer was full.
    pub messages_shed: AtomicU64,

    /// Messages the decoders produced no record for.
    pub decode_skipped: AtomicU64,

    /// Records handed to the writer successfully.
    pub records_written: AtomicU64,

    /// Records the writer failed to persist.
    pub write_errors: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_unauthorized: self.messages_unauthorized.load(Ordering::Relaxed),
            messages_shed: self.messages_shed.load(Ordering::Relaxed),
            decode_skipped: self.decode_skipped.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub connections_accepted: u64,
    pub sessions_active: u64,
    pub sessions_rejected: u64,
    pub messages_received: u64,
    pub messages_unauthorized: u64,
    pub messages_shed: u64,
    pub decode_skipped: u64,
    pub records_written: u64,
    pub write_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = PipelineStats::new();
        PipelineStats::incr(&stats.messages_received);
        PipelineStats::incr(&stats.messages_received);
        PipelineStats::incr(&stats.messages_shed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.messages_shed, 1);
        assert_eq!(snapshot.records_written, 0);
    }
}
