// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series writer.
//!
//! Two mutually exclusive modes, fixed at construction:
//!
//! - **Blocking**: every [`TimeSeriesWriter::record`] call writes one point
//!   and waits for the database, bounded by a timeout. Failures are returned
//!   to the caller.
//! - **Batched**: `record` only appends to a [`BatchBuffer`]. A background
//!   task writes a batch when it is full or when its oldest point waited the
//!   flush interval.
//!   At most `queue_depth` full batches wait for the database; further ones
//!   are dropped. Write failures are logged and counted, never returned.
//!   Points still buffered when the process crashes are lost.
//!
//! Every database write is bounded by the mode's timeout.
//! [`TimeSeriesWriter::close`] flushes whatever is buffered, waiting at most
//! one write timeout, and closes the database client.

use super::buffer::BatchBuffer;
use super::entry::Entry;
use super::line_protocol::{encode_point, now_ns};
use super::{Database, DatabaseError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default timeout of a blocking write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of full batches waiting for the database.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Shortest period at which the flush task checks the batch age.
const MIN_FLUSH_TICK: Duration = Duration::from_millis(5);

/// Writer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// One synchronous write per entry.
    Blocking { timeout: Duration },
    /// Buffered writes, flushed by size or age.
    Batched {
        batch_size: usize,
        flush_interval: Duration,
        timeout: Duration,
        queue_depth: usize,
    },
}

impl WriteMode {
    /// Batched mode with the default write timeout and queue depth.
    pub fn batched(batch_size: usize, flush_interval: Duration) -> Self {
        WriteMode::Batched {
            batch_size,
            flush_interval,
            timeout: DEFAULT_WRITE_TIMEOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Blocking {
            timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Errors returned by [`TimeSeriesWriter::record`].
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("entry for measurement '{0}' has no fields")]
    NoFields(String),
}

/// Writer counters.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub points_recorded: AtomicU64,
    pub points_written: AtomicU64,
    pub batches_written: AtomicU64,
    pub write_errors: AtomicU64,
    pub points_lost: AtomicU64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            points_recorded: self.points_recorded.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            points_lost: self.points_lost.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of writer counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterStatsSnapshot {
    pub points_recorded: u64,
    pub points_written: u64,
    pub batches_written: u64,
    pub write_errors: u64,
    pub points_lost: u64,
}

enum Mode {
    Blocking {
        timeout: Duration,
    },
    Batched {
        buffer: Arc<Mutex<BatchBuffer>>,
        batches: mpsc::Sender<Vec<String>>,
        flusher: JoinHandle<()>,
        timeout: Duration,
    },
}

/// Writes entries to a [`Database`].
///
/// `record` takes `&self` and may be called from several tasks at once.
pub struct TimeSeriesWriter<D: Database> {
    db: Arc<D>,
    mode: Mode,
    stats: Arc<WriterStats>,
}

impl<D: Database> TimeSeriesWriter<D> {
    /// Create a writer. Batched mode spawns its flush task, so this must be
    /// called from within a Tokio runtime.
    pub fn new(db: D, mode: WriteMode) -> Self {
        let db = Arc::new(db);
        let stats = Arc::new(WriterStats::default());

        let mode = match mode {
            WriteMode::Blocking { timeout } => Mode::Blocking { timeout },
            WriteMode::Batched {
                batch_size,
                flush_interval,
                timeout,
                queue_depth,
            } => {
                let buffer = Arc::new(Mutex::new(BatchBuffer::new(batch_size, flush_interval)));
                let (batches, rx) = mpsc::channel(queue_depth.max(1));
                let flusher = tokio::spawn(run_flusher(
                    Arc::clone(&db),
                    Arc::clone(&buffer),
                    rx,
                    flush_interval,
                    timeout,
                    Arc::clone(&stats),
                ));
                Mode::Batched {
                    buffer,
                    batches,
                    flusher,
                    timeout,
                }
            }
        };

        Self { db, mode, stats }
    }

    /// Record an entry, timestamped now.
    pub async fn record(&self, entry: &Entry) -> Result<(), WriteError> {
        let line = encode_point(entry, now_ns())
            .ok_or_else(|| WriteError::NoFields(entry.measurement.clone()))?;
        self.stats.points_recorded.fetch_add(1, Ordering::Relaxed);

        match &self.mode {
            Mode::Blocking { timeout } => {
                match tokio::time::timeout(*timeout, self.db.write(vec![line])).await {
                    Ok(Ok(())) => {
                        self.stats.points_written.fetch_add(1, Ordering::Relaxed);
                        self.stats.batches_written.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        Err(WriteError::Database(e))
                    }
                    Err(_) => {
                        self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        Err(WriteError::Timeout(*timeout))
                    }
                }
            }
            Mode::Batched {
                buffer, batches, ..
            } => {
                let full = lock(buffer).push(line);
                if let Some(batch) = full {
                    let len = batch.len() as u64;
                    match batches.try_send(batch) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!("Database falling behind, dropping batch of {} points", len);
                            self.stats.points_lost.fetch_add(len, Ordering::Relaxed);
                        }
                        Err(TrySendError::Closed(_)) => {
                            tracing::error!("Flush task stopped, dropping {} points", len);
                            self.stats.points_lost.fetch_add(len, Ordering::Relaxed);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Number of points waiting in the batch buffer (always 0 in blocking mode).
    pub fn pending(&self) -> usize {
        match &self.mode {
            Mode::Blocking { .. } => 0,
            Mode::Batched { buffer, .. } => lock(buffer).len(),
        }
    }

    /// Shared writer counters.
    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Flush buffered points (batched mode) and close the database client.
    ///
    /// The final flush gets one write timeout. Points not written by then
    /// are counted as lost.
    pub async fn close(self) {
        if let Mode::Batched {
            buffer,
            batches,
            mut flusher,
            timeout,
        } = self.mode
        {
            let rest = lock(&buffer).drain();
            let drain = async {
                if !rest.is_empty() {
                    tracing::debug!("Final flush of {} buffered points", rest.len());
                    let _ = batches.send(rest).await;
                }
                // Closing the channel lets the flush task drain and exit.
                drop(batches);
                (&mut flusher).await
            };
            let drained = tokio::time::timeout(timeout, drain).await;
            match drained {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Flush task failed: {}", e),
                Err(_) => {
                    tracing::error!("Final flush did not finish within {:?}", timeout);
                    flusher.abort();
                    let _ = flusher.await;
                }
            }

            let s = self.stats.snapshot();
            let unwritten = s
                .points_recorded
                .saturating_sub(s.points_written + s.points_lost);
            if unwritten > 0 {
                tracing::warn!("{} points were never written", unwritten);
                self.stats.points_lost.fetch_add(unwritten, Ordering::Relaxed);
            }
        }
        self.db.close().await;
        tracing::debug!("Database client closed");
    }
}

fn lock(buffer: &Mutex<BatchBuffer>) -> MutexGuard<'_, BatchBuffer> {
    match buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn run_flusher<D: Database>(
    db: Arc<D>,
    buffer: Arc<Mutex<BatchBuffer>>,
    mut batches: mpsc::Receiver<Vec<String>>,
    flush_interval: Duration,
    timeout: Duration,
    stats: Arc<WriterStats>,
) {
    let mut ticker = tokio::time::interval((flush_interval / 4).max(MIN_FLUSH_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            batch = batches.recv() => match batch {
                Some(batch) => write_batch(db.as_ref(), batch, timeout, &stats).await,
                None => break,
            },
            _ = ticker.tick() => {
                let due = lock(&buffer).take_due(Instant::now());
                if let Some(batch) = due {
                    write_batch(db.as_ref(), batch, timeout, &stats).await;
                }
            }
        }
    }
}

async fn write_batch<D: Database>(
    db: &D,
    batch: Vec<String>,
    timeout: Duration,
    stats: &WriterStats,
) {
    let len = batch.len() as u64;
    let error = match tokio::time::timeout(timeout, db.write(batch)).await {
        Ok(Ok(())) => {
            stats.points_written.fetch_add(len, Ordering::Relaxed);
            stats.batches_written.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Flushed batch of {} points", len);
            return;
        }
        Ok(Err(e)) => WriteError::Database(e),
        Err(_) => WriteError::Timeout(timeout),
    };
    stats.write_errors.fetch_add(1, Ordering::Relaxed);
    stats.points_lost.fetch_add(len, Ordering::Relaxed);
    tracing::error!("Batched write of {} points failed: {}", len, error);
}
