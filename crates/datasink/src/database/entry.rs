// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Database entries produced by device decoders.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Typed field value. The variant decides the Line Protocol suffix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    /// Written with an `i` suffix.
    Integer(i64),
    /// Written double-quoted with `"` and `\` escaped.
    String(String),
    Boolean(bool),
}

/// Formats the value the way it appears after `key=` in a point.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::String(v) => {
                f.write_str("\"")?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")
            }
        }
    }
}

/// One decoded reading, before it gets a timestamp.
///
/// Ordered maps keep the encoded line stable for a given input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    /// Series name, `smartmeter` for the DSMR decoder.
    pub measurement: String,
    /// Indexed string attributes.
    pub tags: BTreeMap<String, String>,
    /// Recorded values. Never empty for an entry handed to a writer.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Entry {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a tag, replacing an earlier value for `key`.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_formatting() {
        assert_eq!(FieldValue::Float(3.15).to_string(), "3.15");
        assert_eq!(FieldValue::Float(-0.5).to_string(), "-0.5");
        assert_eq!(FieldValue::Integer(42).to_string(), "42i");
        assert_eq!(FieldValue::Boolean(false).to_string(), "false");
    }

    #[test]
    fn test_string_field_is_quoted_and_escaped() {
        let v = FieldValue::String(r#"say "hi" \o/"#.to_string());
        assert_eq!(v.to_string(), r#""say \"hi\" \\o/""#);
    }

    #[test]
    fn test_entry_builder_keeps_keys_unique() {
        let entry = Entry::new("smartmeter")
            .tag("id", "a")
            .tag("id", "b")
            .field("power", FieldValue::Float(1.0))
            .field("power", FieldValue::Float(2.0));

        assert_eq!(entry.tags.len(), 1);
        assert_eq!(entry.tags["id"], "b");
        assert_eq!(entry.fields.len(), 1);
        assert_eq!(entry.fields["power"], FieldValue::Float(2.0));
    }
}
