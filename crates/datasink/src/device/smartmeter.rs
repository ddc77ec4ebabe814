// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DSMR smart meter gateways (P1 port readers publishing over MQTT).
//!
//! The gateway publishes one value per topic, e.g.
//! `dsmr/reading/electricity_delivered_1` with payload `123.45`.
//! Reference: <https://smartgateways.nl/slimme-meter-p1-dsmr-uitlezen/>

use super::{Device, FieldSpec, ValueKind};
use crate::database::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field decoders per message type, keyed by the last topic level.
pub type Families = BTreeMap<String, BTreeMap<String, FieldSpec>>;

/// Smart meter configuration.
///
/// `families` replaces the built-in tables when present in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartMeterConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// First topic level.
    #[serde(default = "default_root")]
    pub root: String,

    /// Measurement the entries are written to.
    #[serde(default = "default_measurement")]
    pub measurement: String,

    /// Values to record and their data type.
    #[serde(default = "default_families")]
    pub families: Families,
}

impl Default for SmartMeterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_root(),
            measurement: default_measurement(),
            families: default_families(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_root() -> String {
    "dsmr".to_string()
}

fn default_measurement() -> String {
    "smartmeter".to_string()
}

const READING_FLOATS: &[&str] = &[
    "electricity_delivered_1",
    "electricity_delivered_2",
    "electricity_returned_1",
    "electricity_returned_2",
    "electricity_currently_delivered",
    "electricity_currently_returned",
    "phase_currently_delivered_l1",
    "phase_currently_delivered_l2",
    "phase_currently_delivered_l3",
    "phase_currently_returned_l1",
    "phase_currently_returned_l2",
    "phase_currently_returned_l3",
    "phase_voltage_l1",
    "phase_voltage_l2",
    "phase_voltage_l3",
    "phase_power_current_l1",
    "phase_power_current_l2",
    "phase_power_current_l3",
    "extra_device_delivered",
];

const INFO_INTS: &[&str] = &[
    "electricity_tariff",
    "power_failure_count",
    "long_power_failure_count",
    "voltage_sag_count_l1",
    "voltage_sag_count_l2",
    "voltage_sag_count_l3",
    "voltage_swell_count_l1",
    "voltage_swell_count_l2",
    "voltage_swell_count_l3",
];

/// Built-in DSMR tables.
pub fn default_families() -> Families {
    let mut reading: BTreeMap<String, FieldSpec> = READING_FLOATS
        .iter()
        .map(|k| (k.to_string(), FieldSpec::Kind(ValueKind::Float)))
        .collect();
    reading.insert("timestamp".into(), FieldSpec::Kind(ValueKind::String));

    let mut info: BTreeMap<String, FieldSpec> = INFO_INTS
        .iter()
        .map(|k| (k.to_string(), FieldSpec::Kind(ValueKind::Int)))
        .collect();
    info.insert("dsmr_version".into(), FieldSpec::Kind(ValueKind::String));

    let mut consumption = BTreeMap::new();
    consumption.insert(
        "delivered".to_string(),
        FieldSpec::Named {
            kind: ValueKind::Float,
            field: "gas_delivered".into(),
        },
    );
    consumption.insert(
        "currently_delivered".to_string(),
        FieldSpec::Named {
            kind: ValueKind::Float,
            field: "gas_currently_delivered".into(),
        },
    );

    let mut families = Families::new();
    families.insert("reading".into(), reading);
    families.insert("info".into(), info);
    families.insert("consumption".into(), consumption);
    families
}

/// Smart meter decoder.
pub struct SmartMeter {
    config: SmartMeterConfig,
}

impl SmartMeter {
    pub fn new(config: SmartMeterConfig) -> Self {
        Self { config }
    }
}

impl Device for SmartMeter {
    fn name(&self) -> &str {
        "smartmeter"
    }

    fn root(&self) -> &str {
        &self.config.root
    }

    fn decode(
        &self,
        device_id: &str,
        message_type: &str,
        key: &str,
        value: &[u8],
    ) -> Option<Entry> {
        let Some(family) = self.config.families.get(message_type) else {
            tracing::info!(
                id = device_id,
                message_type,
                "Message type not configured for logging, skip"
            );
            return None;
        };
        let Some(spec) = family.get(key) else {
            tracing::info!(
                id = device_id,
                message_type,
                key,
                "Key not configured for logging, skip"
            );
            return None;
        };
        let Some(field) = spec.kind().parse(value) else {
            tracing::info!(
                id = device_id,
                key,
                kind = ?spec.kind(),
                "Value does not parse, skip"
            );
            return None;
        };

        Some(
            Entry::new(self.config.measurement.as_str())
                .tag("id", device_id)
                .field(spec.field_name(key), field),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::line_protocol::encode_point;
    use crate::database::FieldValue;

    fn meter() -> SmartMeter {
        SmartMeter::new(SmartMeterConfig::default())
    }

    #[test]
    fn test_decode_reading_float() {
        let entry = meter()
            .decode("meter1", "reading", "electricity_delivered_1", b"123.45")
            .expect("entry");

        assert_eq!(entry.measurement, "smartmeter");
        assert_eq!(entry.tags.len(), 1);
        assert_eq!(entry.tags["id"], "meter1");
        assert_eq!(
            entry.fields["electricity_delivered_1"],
            FieldValue::Float(123.45)
        );
    }

    #[test]
    fn test_decode_info_int_and_string() {
        let m = meter();
        let tariff = m.decode("m", "info", "electricity_tariff", b"2").unwrap();
        assert_eq!(tariff.fields["electricity_tariff"], FieldValue::Integer(2));

        let version = m.decode("m", "info", "dsmr_version", b"50").unwrap();
        assert_eq!(version.fields["dsmr_version"], FieldValue::String("50".into()));
    }

    #[test]
    fn test_decode_renamed_field() {
        let entry = meter()
            .decode("m", "consumption", "delivered", b"1021.334")
            .unwrap();
        assert_eq!(entry.fields["gas_delivered"], FieldValue::Float(1021.334));
    }

    #[test]
    fn test_unknown_key_and_family_skip() {
        let m = meter();
        assert!(m.decode("m", "reading", "firmware_blob", b"1").is_none());
        assert!(m.decode("m", "diagnostics", "electricity_tariff", b"1").is_none());
    }

    #[test]
    fn test_unparsable_value_produces_no_entry() {
        let m = meter();
        assert!(m
            .decode("m", "reading", "electricity_delivered_1", b"not-a-number")
            .is_none());
        assert!(m.decode("m", "info", "electricity_tariff", b"1.5").is_none());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let m = meter();
        let a = m.decode("m", "reading", "phase_voltage_l1", b"230.1").unwrap();
        let b = m.decode("m", "reading", "phase_voltage_l1", b"230.1").unwrap();
        assert_eq!(a, b);
        assert_eq!(encode_point(&a, 7), encode_point(&b, 7));
    }

    #[test]
    fn test_custom_families_from_toml() {
        let config: SmartMeterConfig = toml::from_str(
            r#"
root = "p1"
measurement = "meter"
[families.reading]
power = "float"
[families.status]
online = { kind = "bool", field = "is_online" }
"#,
        )
        .expect("parse");

        let m = SmartMeter::new(config);
        assert_eq!(m.root(), "p1");
        let entry = m.decode("x", "status", "online", b"true").unwrap();
        assert_eq!(entry.measurement, "meter");
        assert_eq!(entry.fields["is_online"], FieldValue::Boolean(true));
        assert!(m.decode("x", "reading", "electricity_delivered_1", b"1").is_none());
    }
}
