// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device payload decoding.
//!
//! A topic is read as `<root>/<message type>/.../<key>`:
//!
//! ```text
//! dsmr/reading/electricity_delivered_1   "123.45"
//!  |     |       |
//!  |     |       +-- key: selects the field decoder
//!  |     +---------- message type: selects the family
//!  +---------------- root: selects the device
//! ```
//!
//! Decoding never fails. Unknown roots, families or keys and unparsable
//! values produce no entry and a log line, so a misbehaving device cannot
//! take the pipeline down.

pub mod smartmeter;

use crate::config::DevicesConfig;
use crate::database::{Entry, FieldValue};
use crate::message::Message;
use serde::{Deserialize, Serialize};

/// An IoT device type.
pub trait Device: Send + Sync {
    /// Human readable device name (for logs).
    fn name(&self) -> &str;

    /// First topic level this device publishes under.
    fn root(&self) -> &str;

    /// Decode one value.
    ///
    /// Returns `None` for unrecognized input. A returned entry always has at
    /// least one field.
    fn decode(&self, device_id: &str, message_type: &str, key: &str, value: &[u8])
        -> Option<Entry>;
}

/// Scalar type a raw value is parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Float,
    #[serde(alias = "integer")]
    Int,
    String,
    #[serde(alias = "boolean")]
    Bool,
}

impl ValueKind {
    /// Parse a raw payload. Surrounding whitespace is ignored for numbers
    /// and booleans; non-finite floats are rejected.
    pub fn parse(self, raw: &[u8]) -> Option<FieldValue> {
        let text = std::str::from_utf8(raw).ok()?;
        match self {
            ValueKind::Float => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(FieldValue::Float),
            ValueKind::Int => text.trim().parse::<i64>().ok().map(FieldValue::Integer),
            ValueKind::String => Some(FieldValue::String(text.to_string())),
            ValueKind::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Some(FieldValue::Boolean(true)),
                "false" | "0" | "off" => Some(FieldValue::Boolean(false)),
                _ => None,
            },
        }
    }
}

/// Field decoder: value type plus optional field name.
///
/// In configuration either a bare type (`electricity_delivered_1 = "float"`)
/// or a table (`delivered = { kind = "float", field = "gas_delivered" }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    Kind(ValueKind),
    Named {
        kind: ValueKind,
        field: String,
    },
}

impl FieldSpec {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldSpec::Kind(kind) | FieldSpec::Named { kind, .. } => *kind,
        }
    }

    /// Field name for a value received under `key`.
    pub fn field_name<'a>(&'a self, key: &'a str) -> &'a str {
        match self {
            FieldSpec::Kind(_) => key,
            FieldSpec::Named { field, .. } => field,
        }
    }
}

/// Dispatches messages to the device owning the topic root.
#[derive(Default)]
pub struct DecoderRegistry {
    devices: Vec<Box<dyn Device>>,
}

impl DecoderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every device enabled in the configuration.
    pub fn from_config(config: &DevicesConfig) -> Self {
        let mut registry = Self::new();
        if config.smartmeter.enabled {
            registry.register(smartmeter::SmartMeter::new(config.smartmeter.clone()));
        }
        registry
    }

    /// Add a device. A later device never shadows an earlier one with the
    /// same root.
    pub fn register<D: Device + 'static>(&mut self, device: D) {
        if self.devices.iter().any(|d| d.root() == device.root()) {
            tracing::warn!(
                "Device '{}' ignored: root '{}' already registered",
                device.name(),
                device.root()
            );
            return;
        }
        self.devices.push(Box::new(device));
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Decode a message into an entry tagged with its username.
    pub fn decode(&self, message: &Message) -> Option<Entry> {
        let levels: Vec<&str> = message.topic.split('/').collect();
        if levels.len() < 3 || levels.iter().any(|l| l.is_empty()) {
            tracing::info!(
                id = %message.username,
                topic = %message.topic,
                "Topic has no <root>/<type>/<key> structure, skip"
            );
            return None;
        }

        let root = levels[0];
        let Some(device) = self.devices.iter().find(|d| d.root() == root) else {
            tracing::info!(
                id = %message.username,
                topic = %message.topic,
                "No device registered for topic root, skip"
            );
            return None;
        };

        let message_type = levels[1];
        let key = levels[levels.len() - 1];
        device.decode(&message.username, message_type, key, &message.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_value_kind_parse() {
        assert_eq!(ValueKind::Float.parse(b" 1.5\n"), Some(FieldValue::Float(1.5)));
        assert_eq!(ValueKind::Float.parse(b"abc"), None);
        assert_eq!(ValueKind::Float.parse(b"NaN"), None);
        assert_eq!(ValueKind::Int.parse(b"42"), Some(FieldValue::Integer(42)));
        assert_eq!(ValueKind::Int.parse(b"4.2"), None);
        assert_eq!(
            ValueKind::String.parse(b"5.0"),
            Some(FieldValue::String("5.0".into()))
        );
        assert_eq!(ValueKind::String.parse(&[0xff, 0xfe]), None);
        assert_eq!(ValueKind::Bool.parse(b"ON"), Some(FieldValue::Boolean(true)));
        assert_eq!(ValueKind::Bool.parse(b"maybe"), None);
    }

    #[test]
    fn test_field_spec_name() {
        let plain = FieldSpec::Kind(ValueKind::Float);
        let named = FieldSpec::Named {
            kind: ValueKind::Float,
            field: "gas_delivered".into(),
        };
        assert_eq!(plain.field_name("delivered"), "delivered");
        assert_eq!(named.field_name("delivered"), "gas_delivered");
        assert_eq!(named.kind(), ValueKind::Float);
    }

    #[test]
    fn test_registry_skips_unknown_root() {
        let registry = DecoderRegistry::from_config(&DevicesConfig::default());
        let msg = Message::new("meter1", "other/reading/value", Bytes::from_static(b"1"));
        assert!(registry.decode(&msg).is_none());
    }

    #[test]
    fn test_registry_skips_short_topic() {
        let registry = DecoderRegistry::from_config(&DevicesConfig::default());
        for topic in ["dsmr", "dsmr/reading", "dsmr//electricity_delivered_1"] {
            let msg = Message::new("meter1", topic, Bytes::from_static(b"1.0"));
            assert!(registry.decode(&msg).is_none(), "topic {}", topic);
        }
    }

    #[test]
    fn test_registry_ignores_duplicate_root() {
        let mut registry = DecoderRegistry::new();
        registry.register(smartmeter::SmartMeter::new(Default::default()));
        registry.register(smartmeter::SmartMeter::new(Default::default()));
        assert_eq!(registry.len(), 1);
    }
}
