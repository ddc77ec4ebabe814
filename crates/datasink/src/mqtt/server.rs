// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP accept loop.

use super::session::{run_session, SessionContext};
use crate::stats::PipelineStats;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Accepts MQTT connections and runs one session task per connection.
pub struct SessionManager {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl SessionManager {
    /// Bind the listener.
    pub async fn bind(address: &str, ctx: Arc<SessionContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!("MQTT listener on {}", listener.local_addr()?);
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `cancel` fires or the listener fails.
    ///
    /// Every session runs on a child of `cancel`. Returns once all sessions
    /// have ended.
    pub async fn run(self, cancel: CancellationToken) -> std::io::Result<()> {
        let sessions = TaskTracker::new();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        PipelineStats::incr(&self.ctx.stats.connections_accepted);
                        tracing::debug!(remote_addr = %peer, "Accepted connection");
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(remote_addr = %peer, "set_nodelay failed: {}", e);
                        }
                        sessions.spawn(run_session(
                            stream,
                            peer,
                            Arc::clone(&self.ctx),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::warn!("Accept failed, continuing: {}", e);
                    }
                    Err(e) => break Err(e),
                }
            }
        };

        if let Err(e) = &result {
            tracing::error!("MQTT listener failed: {}", e);
            cancel.cancel();
        }
        sessions.close();
        tracing::debug!("Waiting for {} sessions to end", sessions.len());
        sessions.wait().await;
        result
    }
}

/// Errors that concern one pending connection, not the listener.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}
