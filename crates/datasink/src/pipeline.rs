// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline coordinator.
//!
//! ```text
//! SessionManager --try_send--> [bounded buffer] --> dispatch: decode --> TimeSeriesWriter
//! ```
//!
//! The coordinator owns the buffer, runs the accept loop in its own task
//! and the dispatch loop inline. Both stop on the same cancellation token.
//! The writer is closed last, after every session has ended.

use crate::auth::{self, AuthError};
use crate::config::Config;
use crate::database::{Database, TimeSeriesWriter, WriterStats};
use crate::device::DecoderRegistry;
use crate::message::Message;
use crate::mqtt::{SessionConfig, SessionContext, SessionManager, TopicAcl};
use crate::stats::PipelineStats;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MQTT listener failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error("Authentication setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Accept task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The running ingestion pipeline.
pub struct Pipeline<D: Database> {
    manager: SessionManager,
    messages: mpsc::Receiver<Message>,
    registry: DecoderRegistry,
    writer: TimeSeriesWriter<D>,
    stats: Arc<PipelineStats>,
}

impl<D: Database> Pipeline<D> {
    /// Open the credential store, bind the MQTT listener and wire the
    /// stages together.
    pub async fn new(config: &Config, writer: TimeSeriesWriter<D>) -> Result<Self, PipelineError> {
        let credentials = config.mqtt.auth.as_ref().map(auth::new_store).transpose()?;
        if credentials.is_none() {
            tracing::warn!("MQTT authentication disabled, every client is accepted");
        }

        let stats = Arc::new(PipelineStats::new());
        let (tx, messages) = mpsc::channel(config.mqtt.buffer_size);
        let ctx = Arc::new(SessionContext {
            config: SessionConfig::from_mqtt(&config.mqtt),
            credentials,
            acl: TopicAcl::from_config(&config.mqtt.topics),
            messages: tx,
            stats: Arc::clone(&stats),
        });

        let manager = SessionManager::bind(&config.mqtt.address, ctx)
            .await
            .map_err(|source| PipelineError::Bind {
                address: config.mqtt.address.clone(),
                source,
            })?;

        let registry = DecoderRegistry::from_config(&config.devices);
        if registry.is_empty() {
            tracing::warn!("No device decoders enabled, nothing will be recorded");
        }

        Ok(Self {
            manager,
            messages,
            registry,
            writer,
            stats,
        })
    }

    /// Address the MQTT listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.manager.local_addr()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn writer_stats(&self) -> Arc<WriterStats> {
        self.writer.stats()
    }

    /// Run until `cancel` fires or the listener fails.
    ///
    /// A listener failure cancels `cancel` and is returned. In both cases
    /// the writer is flushed and closed before returning.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let Pipeline {
            manager,
            mut messages,
            registry,
            writer,
            stats,
        } = self;

        let mut accept = tokio::spawn(manager.run(cancel.child_token()));
        let mut accept_result = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = &mut accept => {
                    accept_result = Some(result);
                    cancel.cancel();
                    break;
                }
                message = messages.recv() => match message {
                    Some(message) => dispatch(&registry, &writer, &stats, message).await,
                    None => break,
                },
            }
        }

        let accept_result = match accept_result {
            Some(result) => result,
            None => accept.await,
        };
        let mut dropped = 0usize;
        while messages.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::info!("Dropping {} buffered messages on shutdown", dropped);
        }

        tracing::info!("Closing writer");
        writer.close().await;

        accept_result?.map_err(PipelineError::Listener)
    }
}

async fn dispatch<D: Database>(
    registry: &DecoderRegistry,
    writer: &TimeSeriesWriter<D>,
    stats: &PipelineStats,
    message: Message,
) {
    let Some(entry) = registry.decode(&message) else {
        PipelineStats::incr(&stats.decode_skipped);
        return;
    };

    match writer.record(&entry).await {
        Ok(()) => PipelineStats::incr(&stats.records_written),
        Err(e) => {
            PipelineStats::incr(&stats.write_errors);
            tracing::error!(
                username = %message.username,
                topic = %message.topic,
                "Failed to write record: {}",
                e
            );
        }
    }
}
