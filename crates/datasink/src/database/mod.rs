// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series persistence.
//!
//! ```text
//! Entry --> line_protocol::encode_point --> TimeSeriesWriter --> Database
//!                                             |  blocking: one write per entry (timeout)
//!                                             |  batched:  BatchBuffer + flush task
//! ```
//!
//! [`Database`] is the network client seam. [`InfluxDbClient`] talks to the
//! InfluxDB v2 HTTP API, [`MemoryDatabase`] keeps every write in memory.

pub mod buffer;
pub mod entry;
pub mod influxdb;
pub mod line_protocol;
pub mod memory;
pub mod writer;

pub use entry::{Entry, FieldValue};
pub use influxdb::InfluxDbClient;
pub use memory::MemoryDatabase;
pub use writer::{TimeSeriesWriter, WriteError, WriteMode, WriterStats, WriterStatsSnapshot};

use std::future::Future;
use thiserror::Error;

/// Database client errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid database address '{0}'")]
    InvalidAddress(String),

    #[error("database rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("database client is closed")]
    Closed,
}

/// A time-series database client.
///
/// Receives batches of Line Protocol points. A blocking-mode writer hands
/// over one point per call, the batched writer a whole batch.
pub trait Database: Send + Sync + 'static {
    /// Persist a batch of encoded points.
    fn write(&self, lines: Vec<String>) -> impl Future<Output = Result<(), DatabaseError>> + Send;

    /// Release the underlying connection. Called once, after the last write.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
