// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 Line Protocol encoding.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use super::entry::Entry;
use std::time::{SystemTime, UNIX_EPOCH};

/// Encode an entry as a single Line Protocol point.
///
/// Tags and fields come out sorted by key. Returns `None` for an entry
/// without fields, which InfluxDB would reject.
pub fn encode_point(entry: &Entry, timestamp_ns: u64) -> Option<String> {
    if entry.fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(&entry.measurement);

    for (key, value) in &entry.tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');

    for (i, (key, value)) in entry.fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&value.to_string());
    }

    line.push(' ');
    line.push_str(&timestamp_ns.to_string());

    Some(line)
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Spaces and commas must be escaped in measurement names.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entry::FieldValue;

    #[test]
    fn test_line_protocol_simple_point() {
        let entry = Entry::new("temperature").field("value", FieldValue::Float(23.5));
        assert_eq!(
            encode_point(&entry, 1_000_000_000).as_deref(),
            Some("temperature value=23.5 1000000000")
        );
    }

    #[test]
    fn test_line_protocol_sorted_tags_and_fields() {
        let entry = Entry::new("weather")
            .tag("station", "north")
            .tag("region", "eu")
            .field("temp", FieldValue::Float(22.1))
            .field("humidity", FieldValue::Integer(65))
            .field("ok", FieldValue::Boolean(true));

        assert_eq!(
            encode_point(&entry, 2_000_000_000).as_deref(),
            Some("weather,region=eu,station=north humidity=65i,ok=true,temp=22.1 2000000000")
        );
    }

    #[test]
    fn test_line_protocol_escape_special_chars() {
        let entry = Entry::new("my measurement")
            .tag("tag key", "tag,value")
            .field("field=key", FieldValue::String("hello \"world\"".to_string()));

        assert_eq!(
            encode_point(&entry, 3_000_000_000).as_deref(),
            Some("my\\ measurement,tag\\ key=tag\\,value field\\=key=\"hello \\\"world\\\"\" 3000000000")
        );
    }

    #[test]
    fn test_line_protocol_rejects_empty_fields() {
        let entry = Entry::new("empty").tag("id", "x");
        assert!(encode_point(&entry, 1).is_none());
    }
}
