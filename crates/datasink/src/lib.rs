// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! datasink
//!
//! Collects telemetry that IoT devices publish over MQTT 3.1.1, decodes the
//! device payloads and writes them to InfluxDB v2.
//!
//! This crate provides:
//! - An MQTT listener with htpasswd authentication and per-user topic access
//! - Device decoders (DSMR smart meters) driven by configurable field tables
//! - A time-series writer with blocking or batched writes
//! - Health and stats HTTP endpoints
//!
//! # Overview
//!
//! ```text
//! MQTT client --> SessionManager --> [bounded buffer] --> DecoderRegistry --> TimeSeriesWriter --> InfluxDB
//!                  (auth, topic ACL)   (drop when full)     (payload -> Entry)   (line protocol)
//! ```

pub mod auth;
pub mod config;
pub mod database;
pub mod device;
pub mod http;
pub mod message;
pub mod mqtt;
pub mod pipeline;
pub mod stats;

pub use config::Config;
pub use database::{Entry, FieldValue, TimeSeriesWriter, WriteMode};
pub use message::Message;
pub use pipeline::{Pipeline, PipelineError};
pub use stats::{PipelineStats, PipelineStatsSnapshot};
