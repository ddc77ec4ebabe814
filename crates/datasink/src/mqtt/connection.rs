// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet framing over a byte stream.

use super::packet::{Packet, ProtocolError};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 4096;

/// Reads whole control packets from a stream.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_packet_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_packet_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_packet_size,
        }
    }

    /// Next packet, or `None` on a clean end of stream.
    ///
    /// A stream closed in the middle of a packet is an error.
    pub async fn next(&mut self) -> Result<Option<Packet>, ProtocolError> {
        loop {
            if let Some(packet) = Packet::decode(&mut self.buf, self.max_packet_size)? {
                return Ok(Some(packet));
            }
            if self.buf.capacity() - self.buf.len() < READ_CHUNK / 4 {
                self.buf.reserve(READ_CHUNK);
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::Truncated)
                };
            }
        }
    }
}

/// Encode and write one packet.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> std::io::Result<()> {
    let bytes = packet.to_bytes();
    writer.write_all(&bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::packet::{Publish, QoS};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_reads_packets_across_chunks() {
        let (client, server) = tokio::io::duplex(8);
        let mut reader = FrameReader::new(server, 1024);

        let writer = tokio::spawn(async move {
            let mut client = client;
            let publish = Packet::Publish(Publish::new(
                "dsmr/reading/electricity_delivered_1",
                QoS::AtMostOnce,
                None,
                Bytes::from_static(b"123.45"),
            ));
            write_packet(&mut client, &publish).await.unwrap();
            write_packet(&mut client, &Packet::Disconnect).await.unwrap();
        });

        match reader.next().await.unwrap() {
            Some(Packet::Publish(p)) => assert_eq!(&p.payload[..], b"123.45"),
            other => panic!("expected PUBLISH, got {:?}", other),
        }
        assert_eq!(reader.next().await.unwrap(), Some(Packet::Disconnect));
        writer.await.unwrap();
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_mid_packet_is_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server, 1024);

        client.write_all(&[0x30, 10, 0, 1]).await.unwrap();
        drop(client);

        assert!(matches!(reader.next().await, Err(ProtocolError::Truncated)));
    }
}
