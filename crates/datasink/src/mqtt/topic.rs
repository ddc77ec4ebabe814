// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic authorization.
//!
//! Each username is mapped to one allowed topic. A plain entry such as
//! `dsmr` is a prefix: the client may publish to `dsmr` and anything below
//! it. An entry containing `+` or `#` is used as an MQTT topic filter as is.
//! A username without an entry may not publish at all.

use std::collections::{BTreeMap, HashMap};

/// True when `topic` matches the MQTT topic `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level
/// and everything below it. A filter with fewer levels than the topic and
/// no trailing `#` does not match. Wildcards in the first level never match
/// `$`-prefixed topics.
pub fn matches_filter(topic: &str, filter: &str) -> bool {
    if topic.is_empty() || filter.is_empty() {
        return false;
    }
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut levels = topic.split('/');
    for pattern in filter.split('/') {
        match pattern {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

/// True when a client allowed `allowed` may publish to `topic`.
pub fn is_authorized(topic: &str, allowed: &str) -> bool {
    let allowed = allowed.trim_end_matches('/');
    if allowed.is_empty() {
        return false;
    }
    if allowed.contains(&['+', '#'][..]) {
        matches_filter(topic, allowed)
    } else {
        matches_filter(topic, &format!("{}/#", allowed))
    }
}

/// Allowed topic per username.
#[derive(Debug, Clone, Default)]
pub struct TopicAcl {
    allowed: HashMap<String, String>,
}

impl TopicAcl {
    pub fn from_config(topics: &BTreeMap<String, String>) -> Self {
        Self {
            allowed: topics
                .iter()
                .map(|(user, topic)| (user.clone(), topic.clone()))
                .collect(),
        }
    }

    /// Allowed topic of `username`, if configured.
    pub fn allowed_for(&self, username: &str) -> Option<&str> {
        self.allowed.get(username).map(String::as_str)
    }

    pub fn is_allowed(&self, username: &str, topic: &str) -> bool {
        self.allowed_for(username)
            .map(|allowed| is_authorized(topic, allowed))
            .unwrap_or(false)
    }
}
