// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory database backend.
//!
//! Keeps every batch it receives. Used for dry runs (`type = "memory"`) and
//! by tests, which can also inject latency and failures.

use super::{Database, DatabaseError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    batches: Vec<Vec<String>>,
    closed: bool,
    delay: Option<Duration>,
    fail: bool,
}

/// Database that records writes in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by `delay` before recording it.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state().delay = Some(delay);
        self
    }

    /// Reject every write.
    pub fn failing(self) -> Self {
        self.state().fail = true;
        self
    }

    /// Number of write calls that reached the database.
    pub fn write_count(&self) -> usize {
        self.state().batches.len()
    }

    /// Every recorded batch, in arrival order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.state().batches.clone()
    }

    /// Every recorded point, flattened.
    pub fn lines(&self) -> Vec<String> {
        self.state().batches.iter().flatten().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Database for MemoryDatabase {
    async fn write(&self, lines: Vec<String>) -> Result<(), DatabaseError> {
        let (delay, fail, closed) = {
            let state = self.state();
            (state.delay, state.fail, state.closed)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if closed {
            return Err(DatabaseError::Closed);
        }
        if fail {
            return Err(DatabaseError::Rejected {
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        tracing::trace!("MemoryDatabase: recorded {} points", lines.len());
        self.state().batches.push(lines);
        Ok(())
    }

    async fn close(&self) {
        self.state().closed = true;
    }
}
