// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the integration tests: a minimal MQTT client and a
//! pipeline running on an ephemeral port.

#![allow(dead_code)]

use bytes::Bytes;
use datasink::database::{MemoryDatabase, TimeSeriesWriter, WriteMode};
use datasink::mqtt::connection::{write_packet, FrameReader};
use datasink::mqtt::packet::{Connect, ConnectReturnCode, Packet, Publish, QoS};
use datasink::{Config, Pipeline, PipelineError, PipelineStats};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Pipeline under test.
pub struct RunningPipeline {
    pub addr: SocketAddr,
    pub stats: Arc<PipelineStats>,
    pub cancel: CancellationToken,
    task: JoinHandle<Result<(), PipelineError>>,
}

impl RunningPipeline {
    /// Cancel and wait for the pipeline to finish (writer closed).
    pub async fn shutdown(self) -> Result<(), PipelineError> {
        self.cancel.cancel();
        tokio::time::timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("pipeline stops in time")
            .expect("pipeline task")
    }
}

/// Configuration listening on 127.0.0.1 with `meter1` allowed under `dsmr`.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.http.enabled = false;
    config.mqtt.address = "127.0.0.1:0".into();
    config
        .mqtt
        .topics
        .insert("meter1".to_string(), "dsmr".to_string());
    config
}

pub async fn start_pipeline(config: &Config, db: MemoryDatabase, mode: WriteMode) -> RunningPipeline {
    let writer = TimeSeriesWriter::new(db, mode);
    let pipeline = Pipeline::new(config, writer).await.expect("pipeline");
    let addr = pipeline.local_addr().expect("local addr");
    let stats = pipeline.stats();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(pipeline.run(cancel.clone()));

    RunningPipeline {
        addr,
        stats,
        cancel,
        task,
    }
}

/// Wait until the database saw at least `count` write calls.
pub async fn wait_for_writes(db: &MemoryDatabase, count: usize) {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while db.write_count() < count && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Minimal MQTT client.
pub struct TestClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u16,
}

impl TestClient {
    pub async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (rd, writer) = stream.into_split();
        Self {
            reader: FrameReader::new(rd, 64 * 1024),
            writer,
            next_id: 1,
        }
    }

    /// Open a connection, send CONNECT and return the CONNACK code.
    pub async fn connect(addr: SocketAddr, connect: Connect) -> (Self, ConnectReturnCode) {
        let mut client = Self::open(addr).await;
        client.send(Packet::Connect(connect)).await;
        match client.recv().await {
            Some(Packet::ConnAck { code, .. }) => (client, code),
            other => panic!("expected CONNACK, got {:?}", other),
        }
    }

    /// Connect without credentials as `username`, expecting acceptance.
    pub async fn connect_as(addr: SocketAddr, username: &str) -> Self {
        let connect = Connect {
            username: Some(username.to_string()),
            ..Connect::new(format!("{}-client", username))
        };
        let (client, code) = Self::connect(addr, connect).await;
        assert_eq!(code, ConnectReturnCode::Accepted);
        client
    }

    pub async fn send(&mut self, packet: Packet) {
        write_packet(&mut self.writer, &packet).await.expect("send");
    }

    /// Next packet from the server, `None` once the server closed.
    pub async fn recv(&mut self) -> Option<Packet> {
        tokio::time::timeout(RECV_TIMEOUT, self.reader.next())
            .await
            .expect("server answers in time")
            .ok()
            .flatten()
    }

    /// QoS 0 publish.
    pub async fn publish(&mut self, topic: &str, payload: &str) {
        self.send(Packet::Publish(Publish::new(
            topic,
            QoS::AtMostOnce,
            None,
            Bytes::copy_from_slice(payload.as_bytes()),
        )))
        .await;
    }

    /// QoS 1 publish, waits for the PUBACK.
    pub async fn publish_acked(&mut self, topic: &str, payload: &str) {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.send(Packet::Publish(Publish::new(
            topic,
            QoS::AtLeastOnce,
            Some(id),
            Bytes::copy_from_slice(payload.as_bytes()),
        )))
        .await;
        assert_eq!(self.recv().await, Some(Packet::PubAck(id)));
    }

    /// Round trip, proving every earlier packet was handled.
    pub async fn ping(&mut self) {
        self.send(Packet::PingReq).await;
        assert_eq!(self.recv().await, Some(Packet::PingResp));
    }

    /// Send PINGREQ without reading the answers until the connection
    /// stops accepting data.
    pub async fn flood_pings(&mut self) {
        let chunk = Packet::PingReq.to_bytes().repeat(32 * 1024);
        for _ in 0..512 {
            let write = tokio::time::timeout(Duration::from_millis(200), self.writer.write_all(&chunk));
            if !matches!(write.await, Ok(Ok(()))) {
                return;
            }
        }
    }

    pub async fn disconnect(mut self) {
        self.send(Packet::Disconnect).await;
    }
}
