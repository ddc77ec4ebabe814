// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection session.
//!
//! ```text
//! socket --> reader task --(SessionEvent)--> session loop --> socket (acks)
//!                                                 |
//!                                                 +--> try_send(Message) --> buffer
//! ```
//!
//! The reader task owns the read half and turns packets into events. The
//! session loop owns the write half, authorizes publishes and enqueues
//! them. The loop also watches the idle deadline and the cancellation
//! token. Every write to the client races the same token and a write
//! timeout, so neither a blocked read nor a client that stopped reading
//! delays shutdown.

use super::connection::{write_packet, FrameReader};
use super::packet::{Connect, ConnectReturnCode, Packet, ProtocolError, Publish, QoS};
use super::topic::TopicAcl;
use crate::auth::CredentialStore;
use crate::config::MqttConfig;
use crate::message::Message;
use crate::stats::PipelineStats;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

/// Capacity of the reader task to session loop channel.
const EVENT_QUEUE: usize = 32;

/// Errors raised before a session is established.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no CONNECT within {0:?}")]
    Timeout(Duration),

    #[error("connection closed before CONNECT")]
    Closed,

    #[error("expected CONNECT, got packet type {0}")]
    UnexpectedPacket(u8),

    #[error("{0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("bad credentials for user '{0}'")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("client did not take a packet within {0:?}")]
    WriteTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent DISCONNECT.
    Disconnected,
    /// Client closed the connection.
    Closed,
    /// No packet within the idle timeout.
    IdleTimeout,
    /// Shutdown requested.
    Cancelled,
}

/// Session timing and limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    /// Fixed idle timeout. `None` derives it from the client keep-alive.
    pub idle_timeout: Option<Duration>,
    /// Limit for writing one packet to a client that stopped reading.
    pub write_timeout: Duration,
    pub max_packet_size: usize,
}

impl SessionConfig {
    pub fn from_mqtt(config: &MqttConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            idle_timeout: config.idle_timeout(),
            write_timeout: config.write_timeout(),
            max_packet_size: config.max_packet_size,
        }
    }

    /// Idle timeout for a client announcing `keep_alive` seconds.
    ///
    /// MQTT allows one and a half keep-alive periods of silence.
    pub fn idle_timeout_for(&self, keep_alive: u16) -> Option<Duration> {
        self.idle_timeout.or_else(|| {
            (keep_alive > 0).then(|| Duration::from_millis(u64::from(keep_alive) * 1500))
        })
    }
}

/// State shared by every session.
pub struct SessionContext {
    pub config: SessionConfig,
    /// `None` accepts every client.
    pub credentials: Option<Arc<dyn CredentialStore>>,
    pub acl: TopicAcl,
    /// Bounded buffer towards the decoder stage.
    pub messages: mpsc::Sender<Message>,
    pub stats: Arc<PipelineStats>,
}

enum SessionEvent {
    Publish(Publish),
    Respond(Packet),
    Disconnect,
    Eof,
    Failed(ProtocolError),
}

/// Serve one connection until it ends or `cancel` fires.
///
/// The write half is shut down exactly once, whatever the exit path, and
/// the reader task never outlives the session.
pub async fn run_session<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    cancel: CancellationToken,
) -> Result<SessionEnd, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    ctx.stats.sessions_active.fetch_add(1, Ordering::Relaxed);

    let (read_half, mut write_half) = tokio::io::split(stream);
    let reader = FrameReader::new(read_half, ctx.config.max_packet_size);
    let result = drive(reader, &mut write_half, peer, &ctx, &cancel).await;

    match tokio::time::timeout(ctx.config.write_timeout, write_half.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::trace!(remote_addr = %peer, "Shutdown after session end: {}", e),
        Err(_) => tracing::trace!(remote_addr = %peer, "Shutdown after session end timed out"),
    }
    ctx.stats.sessions_active.fetch_sub(1, Ordering::Relaxed);

    match &result {
        Ok(SessionEnd::IdleTimeout) => {
            tracing::warn!(remote_addr = %peer, "Session idle timeout, disconnecting")
        }
        Ok(end) => tracing::info!(remote_addr = %peer, "Session ended: {:?}", end),
        Err(SessionError::Auth(user)) => {
            tracing::warn!(remote_addr = %peer, username = %user, "Authentication failed")
        }
        Err(e) => tracing::error!(remote_addr = %peer, "Session failed: {}", e),
    }
    result
}

async fn drive<R, W>(
    mut reader: FrameReader<R>,
    writer: &mut W,
    peer: SocketAddr,
    ctx: &SessionContext,
    cancel: &CancellationToken,
) -> Result<SessionEnd, SessionError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let connect = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = handshake(&mut reader, ctx.config.handshake_timeout) => match result {
            Ok(connect) => connect,
            Err(HandshakeError::Protocol(ProtocolError::UnsupportedProtocolLevel(level))) => {
                let refused = connack(ConnectReturnCode::UnacceptableProtocolVersion);
                let _ = send(writer, &refused, ctx, cancel).await;
                return Err(ProtocolError::UnsupportedProtocolLevel(level).into());
            }
            Err(e) => return Err(e.into()),
        },
    };

    let username = authenticate(&connect, writer, ctx, cancel).await?;
    if !send(writer, &connack(ConnectReturnCode::Accepted), ctx, cancel).await? {
        return Ok(SessionEnd::Cancelled);
    }

    if ctx.acl.allowed_for(&username).is_none() {
        tracing::warn!(
            remote_addr = %peer,
            username = %username,
            "No topic configured for user, every publish will be dropped"
        );
    }

    let idle_timeout = ctx.config.idle_timeout_for(connect.keep_alive);
    tracing::info!(
        remote_addr = %peer,
        username = %username,
        client_id = %connect.client_id,
        "Session established"
    );

    let (events_tx, mut events) = mpsc::channel(EVENT_QUEUE);
    let _reader = AbortOnDropHandle::new(tokio::spawn(read_loop(reader, events_tx)));

    let mut deadline = idle_timeout.map(|t| Instant::now() + t);
    loop {
        let idle = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            _ = idle => return Ok(SessionEnd::IdleTimeout),
            event = events.recv() => {
                deadline = idle_timeout.map(|t| Instant::now() + t);
                match event {
                    Some(SessionEvent::Publish(publish)) => on_publish(ctx, peer, &username, publish),
                    Some(SessionEvent::Respond(packet)) => {
                        if !send(writer, &packet, ctx, cancel).await? {
                            return Ok(SessionEnd::Cancelled);
                        }
                    }
                    Some(SessionEvent::Disconnect) => return Ok(SessionEnd::Disconnected),
                    Some(SessionEvent::Eof) | None => return Ok(SessionEnd::Closed),
                    Some(SessionEvent::Failed(e)) => return Err(e.into()),
                }
            }
        }
    }
}

async fn handshake<R>(reader: &mut FrameReader<R>, timeout: Duration) -> Result<Connect, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, reader.next()).await {
        Err(_) => Err(HandshakeError::Timeout(timeout)),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(None)) => Err(HandshakeError::Closed),
        Ok(Ok(Some(Packet::Connect(connect)))) => Ok(connect),
        Ok(Ok(Some(other))) => Err(HandshakeError::UnexpectedPacket(other.packet_type())),
    }
}

/// Check credentials. On failure CONNACK 4 is the only packet written.
async fn authenticate<W>(
    connect: &Connect,
    writer: &mut W,
    ctx: &SessionContext,
    cancel: &CancellationToken,
) -> Result<String, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let username = connect.username.clone().unwrap_or_default();
    let Some(store) = &ctx.credentials else {
        return Ok(username);
    };

    let password = connect
        .password
        .as_ref()
        .and_then(|p| std::str::from_utf8(p).ok())
        .map(str::to_string);

    let accepted = match (&connect.username, password) {
        (Some(user), Some(pass)) => {
            // bcrypt is slow on purpose; keep it off the async workers.
            let store = Arc::clone(store);
            let user = user.clone();
            tokio::task::spawn_blocking(move || store.verify(&user, &pass))
                .await
                .unwrap_or(false)
        }
        _ => false,
    };

    if !accepted {
        ctx.stats.sessions_rejected.fetch_add(1, Ordering::Relaxed);
        send(writer, &connack(ConnectReturnCode::BadUserNameOrPassword), ctx, cancel).await?;
        return Err(SessionError::Auth(username));
    }
    Ok(username)
}

/// Write one packet to the client.
///
/// Returns `Ok(false)` when `cancel` fired before the packet was written.
async fn send<W>(
    writer: &mut W,
    packet: &Packet,
    ctx: &SessionContext,
    cancel: &CancellationToken,
) -> Result<bool, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let timeout = ctx.config.write_timeout;
    tokio::select! {
        _ = cancel.cancelled() => Ok(false),
        result = tokio::time::timeout(timeout, write_packet(writer, packet)) => match result {
            Ok(written) => written.map(|()| true).map_err(SessionError::from),
            Err(_) => Err(SessionError::WriteTimeout(timeout)),
        },
    }
}

fn on_publish(ctx: &SessionContext, peer: SocketAddr, username: &str, publish: Publish) {
    PipelineStats::incr(&ctx.stats.messages_received);

    if !ctx.acl.is_allowed(username, &publish.topic) {
        PipelineStats::incr(&ctx.stats.messages_unauthorized);
        tracing::warn!(
            remote_addr = %peer,
            username = %username,
            topic = %publish.topic,
            "Publish to unauthorized topic dropped"
        );
        return;
    }

    let message = Message::new(username, publish.topic, publish.payload);
    match ctx.messages.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(message)) => {
            PipelineStats::incr(&ctx.stats.messages_shed);
            tracing::warn!(
                username = %username,
                topic = %message.topic,
                "Message buffer full, dropping message"
            );
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(username = %username, "Pipeline stopped, dropping message");
        }
    }
}

async fn read_loop<R>(mut reader: FrameReader<R>, events: mpsc::Sender<SessionEvent>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let (event, response) = match reader.next().await {
            Ok(Some(Packet::Publish(publish))) => {
                let ack = match (publish.qos, publish.packet_id) {
                    (QoS::AtLeastOnce, Some(id)) => Some(Packet::PubAck(id)),
                    (QoS::ExactlyOnce, Some(id)) => Some(Packet::PubRec(id)),
                    _ => None,
                };
                (SessionEvent::Publish(publish), ack)
            }
            Ok(Some(Packet::PubRel(id))) => (SessionEvent::Respond(Packet::PubComp(id)), None),
            Ok(Some(Packet::Subscribe { packet_id, filters })) => {
                // Nothing is ever delivered back, so every filter gets QoS 0.
                let return_codes = filters.iter().map(|_| QoS::AtMostOnce as u8).collect();
                let ack = Packet::SubAck {
                    packet_id,
                    return_codes,
                };
                (SessionEvent::Respond(ack), None)
            }
            Ok(Some(Packet::Unsubscribe { packet_id, .. })) => {
                (SessionEvent::Respond(Packet::UnsubAck(packet_id)), None)
            }
            Ok(Some(Packet::PingReq)) => (SessionEvent::Respond(Packet::PingResp), None),
            Ok(Some(Packet::Disconnect)) => (SessionEvent::Disconnect, None),
            Ok(Some(Packet::PubAck(_) | Packet::PubRec(_) | Packet::PubComp(_))) => continue,
            Ok(Some(other)) => (
                SessionEvent::Failed(ProtocolError::UnexpectedPacket(other.packet_type())),
                None,
            ),
            Ok(None) => (SessionEvent::Eof, None),
            Err(e) => (SessionEvent::Failed(e), None),
        };

        let terminal = matches!(
            event,
            SessionEvent::Disconnect | SessionEvent::Eof | SessionEvent::Failed(_)
        );
        if events.send(event).await.is_err() {
            return;
        }
        if let Some(ack) = response {
            if events.send(SessionEvent::Respond(ack)).await.is_err() {
                return;
            }
        }
        if terminal {
            return;
        }
    }
}

fn connack(code: ConnectReturnCode) -> Packet {
    Packet::ConnAck {
        session_present: false,
        code,
    }
}
