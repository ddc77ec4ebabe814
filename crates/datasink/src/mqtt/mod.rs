// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT 3.1.1 ingestion.
//!
//! Only the collector side of the protocol is implemented: clients connect,
//! authenticate and publish. Subscriptions are acknowledged but nothing is
//! ever delivered back, and retained messages and wills are ignored.

pub mod connection;
pub mod packet;
pub mod server;
pub mod session;
pub mod topic;

pub use packet::{Packet, ProtocolError, QoS};
pub use server::SessionManager;
pub use session::{
    run_session, HandshakeError, SessionConfig, SessionContext, SessionEnd, SessionError,
};
pub use topic::{is_authorized, matches_filter, TopicAcl};
