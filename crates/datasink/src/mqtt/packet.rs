// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// MQTT 3.1.1 control packet parser/builder.
//
// All parsing is safe: malformed input returns Err, never panics.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while reading or validating control packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed remaining length")]
    MalformedRemainingLength,

    #[error("packet of {size} bytes exceeds limit of {max} bytes")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),

    #[error("invalid flags 0x{flags:x} for packet type {packet_type}")]
    InvalidFlags { packet_type: u8, flags: u8 },

    #[error("packet truncated")]
    Truncated,

    #[error("unexpected trailing bytes")]
    TrailingBytes,

    #[error("invalid protocol name '{0}'")]
    InvalidProtocolName(String),

    #[error("unsupported protocol level {0}")]
    UnsupportedProtocolLevel(u8),

    #[error("invalid QoS {0}")]
    InvalidQoS(u8),

    #[error("invalid CONNACK return code {0}")]
    InvalidReturnCode(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid topic name '{0}'")]
    InvalidTopic(String),

    #[error("packet identifier must be non-zero")]
    ZeroPacketId,

    #[error("SUBSCRIBE/UNSUBSCRIBE without topic filters")]
    EmptySubscription,

    #[error("unexpected packet type {0}")]
    UnexpectedPacket(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const CONNECT: u8 = 1;
pub const CONNACK: u8 = 2;
pub const PUBLISH: u8 = 3;
pub const PUBACK: u8 = 4;
pub const PUBREC: u8 = 5;
pub const PUBREL: u8 = 6;
pub const PUBCOMP: u8 = 7;
pub const SUBSCRIBE: u8 = 8;
pub const SUBACK: u8 = 9;
pub const UNSUBSCRIBE: u8 = 10;
pub const UNSUBACK: u8 = 11;
pub const PINGREQ: u8 = 12;
pub const PINGRESP: u8 = 13;
pub const DISCONNECT: u8 = 14;

/// Largest value the remaining length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// SUBACK return code for a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Delivery guarantee of a PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ProtocolError::InvalidQoS(other)),
        }
    }
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptableProtocolVersion),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadUserNameOrPassword),
            5 => Ok(Self::NotAuthorized),
            other => Err(ProtocolError::InvalidReturnCode(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// Last will announced in CONNECT. Parsed, never published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// 3 for `MQIsdp`, 4 for `MQTT`.
    pub protocol_level: u8,
    pub clean_session: bool,
    /// Keep-alive interval in seconds, 0 disables it.
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    /// Minimal MQTT 3.1.1 CONNECT.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_level: 4,
            clean_session: true,
            keep_alive: 0,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(Bytes::copy_from_slice(password.as_bytes()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff `qos` is above 0.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl Publish {
    pub fn new(topic: impl Into<String>, qos: QoS, packet_id: Option<u16>, payload: Bytes) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic: topic.into(),
            packet_id,
            payload,
        }
    }
}

/// An MQTT 3.1.1 control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck {
        session_present: bool,
        code: ConnectReturnCode,
    },
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, QoS)>,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    Unsubscribe {
        packet_id: u16,
        filters: Vec<String>,
    },
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Control packet type (upper nibble of the fixed header).
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Connect(_) => CONNECT,
            Packet::ConnAck { .. } => CONNACK,
            Packet::Publish(_) => PUBLISH,
            Packet::PubAck(_) => PUBACK,
            Packet::PubRec(_) => PUBREC,
            Packet::PubRel(_) => PUBREL,
            Packet::PubComp(_) => PUBCOMP,
            Packet::Subscribe { .. } => SUBSCRIBE,
            Packet::SubAck { .. } => SUBACK,
            Packet::Unsubscribe { .. } => UNSUBSCRIBE,
            Packet::UnsubAck(_) => UNSUBACK,
            Packet::PingReq => PINGREQ,
            Packet::PingResp => PINGRESP,
            Packet::Disconnect => DISCONNECT,
        }
    }

    /// Try to take one complete packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A packet larger than
    /// `max_packet_size` is rejected as soon as its header is readable.
    pub fn decode(buf: &mut BytesMut, max_packet_size: usize) -> Result<Option<Packet>, ProtocolError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let Some((remaining, len_bytes)) = decode_remaining_length(&buf[1..])? else {
            return Ok(None);
        };

        let total = 1 + len_bytes + remaining;
        if total > max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: total,
                max: max_packet_size,
            });
        }
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        let mut frame = buf.split_to(total).freeze();
        let header = frame.get_u8();
        frame.advance(len_bytes);
        Self::parse(header, frame).map(Some)
    }

    fn parse(header: u8, mut body: Bytes) -> Result<Packet, ProtocolError> {
        let packet_type = header >> 4;
        let flags = header & 0x0F;

        let expected_flags = match packet_type {
            PUBLISH => flags,
            PUBREL | SUBSCRIBE | UNSUBSCRIBE => 0b0010,
            CONNECT..=DISCONNECT => 0,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        };
        if flags != expected_flags {
            return Err(ProtocolError::InvalidFlags { packet_type, flags });
        }

        let packet = match packet_type {
            CONNECT => Packet::Connect(parse_connect(&mut body)?),
            CONNACK => {
                expect_len(&body, 2)?;
                let ack_flags = body.get_u8();
                let code = ConnectReturnCode::try_from(body.get_u8())?;
                Packet::ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    code,
                }
            }
            PUBLISH => Packet::Publish(parse_publish(flags, &mut body)?),
            PUBACK => Packet::PubAck(parse_packet_id_only(&mut body)?),
            PUBREC => Packet::PubRec(parse_packet_id_only(&mut body)?),
            PUBREL => Packet::PubRel(parse_packet_id_only(&mut body)?),
            PUBCOMP => Packet::PubComp(parse_packet_id_only(&mut body)?),
            SUBSCRIBE => {
                let packet_id = read_packet_id(&mut body)?;
                let mut filters = Vec::new();
                while body.has_remaining() {
                    let filter = read_string(&mut body)?;
                    let qos = QoS::try_from(read_u8(&mut body)?)?;
                    filters.push((filter, qos));
                }
                if filters.is_empty() {
                    return Err(ProtocolError::EmptySubscription);
                }
                Packet::Subscribe { packet_id, filters }
            }
            SUBACK => {
                let packet_id = read_packet_id(&mut body)?;
                let return_codes = body.to_vec();
                body.clear();
                Packet::SubAck {
                    packet_id,
                    return_codes,
                }
            }
            UNSUBSCRIBE => {
                let packet_id = read_packet_id(&mut body)?;
                let mut filters = Vec::new();
                while body.has_remaining() {
                    filters.push(read_string(&mut body)?);
                }
                if filters.is_empty() {
                    return Err(ProtocolError::EmptySubscription);
                }
                Packet::Unsubscribe { packet_id, filters }
            }
            UNSUBACK => Packet::UnsubAck(parse_packet_id_only(&mut body)?),
            PINGREQ => Packet::PingReq,
            PINGRESP => Packet::PingResp,
            DISCONNECT => Packet::Disconnect,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        };

        if body.has_remaining() {
            return Err(ProtocolError::TrailingBytes);
        }
        Ok(packet)
    }

    /// Append the encoded packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        let mut flags = 0u8;

        match self {
            Packet::Connect(c) => encode_connect(c, &mut body),
            Packet::ConnAck {
                session_present,
                code,
            } => {
                body.put_u8(u8::from(*session_present));
                body.put_u8(*code as u8);
            }
            Packet::Publish(p) => {
                flags = (u8::from(p.dup) << 3) | ((p.qos as u8) << 1) | u8::from(p.retain);
                put_string(&mut body, &p.topic);
                if let Some(id) = p.packet_id {
                    body.put_u16(id);
                }
                body.put_slice(&p.payload);
            }
            Packet::PubAck(id) | Packet::PubRec(id) | Packet::PubComp(id) | Packet::UnsubAck(id) => {
                body.put_u16(*id)
            }
            Packet::PubRel(id) => {
                flags = 0b0010;
                body.put_u16(*id);
            }
            Packet::Subscribe { packet_id, filters } => {
                flags = 0b0010;
                body.put_u16(*packet_id);
                for (filter, qos) in filters {
                    put_string(&mut body, filter);
                    body.put_u8(*qos as u8);
                }
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                body.put_u16(*packet_id);
                body.put_slice(return_codes);
            }
            Packet::Unsubscribe { packet_id, filters } => {
                flags = 0b0010;
                body.put_u16(*packet_id);
                for filter in filters {
                    put_string(&mut body, filter);
                }
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }

        dst.reserve(1 + 4 + body.len());
        dst.put_u8((self.packet_type() << 4) | flags);
        encode_remaining_length(body.len(), dst);
        dst.put_slice(&body);
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// Variable headers and payloads
// ---------------------------------------------------------------------------

fn parse_connect(body: &mut Bytes) -> Result<Connect, ProtocolError> {
    let protocol_name = read_string(body)?;
    let protocol_level = read_u8(body)?;
    match (protocol_name.as_str(), protocol_level) {
        ("MQTT", 4) | ("MQIsdp", 3) => {}
        ("MQTT", level) | ("MQIsdp", level) => {
            return Err(ProtocolError::UnsupportedProtocolLevel(level))
        }
        _ => return Err(ProtocolError::InvalidProtocolName(protocol_name)),
    }

    let flags = read_u8(body)?;
    if flags & 0x01 != 0 {
        return Err(ProtocolError::InvalidFlags {
            packet_type: CONNECT,
            flags,
        });
    }
    let clean_session = flags & 0x02 != 0;
    let has_will = flags & 0x04 != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
    let will_retain = flags & 0x20 != 0;
    let has_password = flags & 0x40 != 0;
    let has_username = flags & 0x80 != 0;

    let keep_alive = read_u16(body)?;
    let client_id = read_string(body)?;

    let will = if has_will {
        let topic = read_string(body)?;
        let payload = read_binary(body)?;
        Some(LastWill {
            topic,
            payload,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if has_username {
        Some(read_string(body)?)
    } else {
        None
    };
    let password = if has_password {
        Some(read_binary(body)?)
    } else {
        None
    };

    Ok(Connect {
        protocol_level,
        clean_session,
        keep_alive,
        client_id,
        will,
        username,
        password,
    })
}

fn encode_connect(c: &Connect, body: &mut BytesMut) {
    let name = if c.protocol_level == 3 { "MQIsdp" } else { "MQTT" };
    put_string(body, name);
    body.put_u8(c.protocol_level);

    let mut flags = 0u8;
    if c.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &c.will {
        flags |= 0x04 | ((will.qos as u8) << 3);
        if will.retain {
            flags |= 0x20;
        }
    }
    if c.password.is_some() {
        flags |= 0x40;
    }
    if c.username.is_some() {
        flags |= 0x80;
    }
    body.put_u8(flags);
    body.put_u16(c.keep_alive);
    put_string(body, &c.client_id);

    if let Some(will) = &c.will {
        put_string(body, &will.topic);
        put_binary(body, &will.payload);
    }
    if let Some(username) = &c.username {
        put_string(body, username);
    }
    if let Some(password) = &c.password {
        put_binary(body, password);
    }
}

fn parse_publish(flags: u8, body: &mut Bytes) -> Result<Publish, ProtocolError> {
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let topic = read_string(body)?;
    if topic.is_empty() || topic.contains(&['+', '#'][..]) {
        return Err(ProtocolError::InvalidTopic(topic));
    }
    let packet_id = if qos > QoS::AtMostOnce {
        Some(read_packet_id(body)?)
    } else {
        None
    };
    let payload = body.split_to(body.len());

    Ok(Publish {
        dup: flags & 0x08 != 0,
        qos,
        retain: flags & 0x01 != 0,
        topic,
        packet_id,
        payload,
    })
}

fn parse_packet_id_only(body: &mut Bytes) -> Result<u16, ProtocolError> {
    expect_len(body, 2)?;
    read_packet_id(body)
}

// ---------------------------------------------------------------------------
// Primitive helpers
// ---------------------------------------------------------------------------

/// Decode the remaining length field. Returns the value and the number of
/// bytes it occupies, or `None` if the field is not complete yet.
fn decode_remaining_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().take(4).enumerate() {
        value |= usize::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if bytes.len() >= 4 {
        Err(ProtocolError::MalformedRemainingLength)
    } else {
        Ok(None)
    }
}

fn encode_remaining_length(mut len: usize, dst: &mut BytesMut) {
    debug_assert!(len <= MAX_REMAINING_LENGTH);
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

fn expect_len(body: &Bytes, len: usize) -> Result<(), ProtocolError> {
    match body.len() {
        n if n < len => Err(ProtocolError::Truncated),
        n if n > len => Err(ProtocolError::TrailingBytes),
        _ => Ok(()),
    }
}

fn read_u8(body: &mut Bytes) -> Result<u8, ProtocolError> {
    if body.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    Ok(body.get_u8())
}

fn read_u16(body: &mut Bytes) -> Result<u16, ProtocolError> {
    if body.remaining() < 2 {
        return Err(ProtocolError::Truncated);
    }
    Ok(body.get_u16())
}

fn read_packet_id(body: &mut Bytes) -> Result<u16, ProtocolError> {
    match read_u16(body)? {
        0 => Err(ProtocolError::ZeroPacketId),
        id => Ok(id),
    }
}

fn read_binary(body: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = usize::from(read_u16(body)?);
    if body.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    Ok(body.split_to(len))
}

fn read_string(body: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = read_binary(body)?;
    let text = std::str::from_utf8(&raw).map_err(|_| ProtocolError::InvalidUtf8)?;
    if text.contains('\0') {
        return Err(ProtocolError::InvalidUtf8);
    }
    Ok(text.to_string())
}

fn put_binary(dst: &mut BytesMut, data: &[u8]) {
    let len = data.len().min(usize::from(u16::MAX));
    dst.put_u16(len as u16);
    dst.put_slice(&data[..len]);
}

fn put_string(dst: &mut BytesMut, s: &str) {
    put_binary(dst, s.as_bytes());
}
