// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messages handed from MQTT sessions to the decoder stage.

use bytes::Bytes;

/// A publish accepted from an authorized client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Username of the publishing session. Used as device identifier.
    pub username: String,
    /// Topic the payload was published to.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl Message {
    pub fn new(username: impl Into<String>, topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            username: username.into(),
            topic: topic.into(),
            payload,
        }
    }
}
