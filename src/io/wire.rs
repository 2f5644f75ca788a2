//! Session-coordination wire protocol
//!
//! JSON frames over the persistent WebSocket connection, discriminated
//! by an uppercase `type` tag. Every message kind the service can send
//! is an explicit enum variant; a frame with an unknown tag (or a
//! missing field) fails to decode and is surfaced to the caller rather
//! than being silently dropped.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{Bottle, SessionId};

/// Frames sent by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "HELLO")]
    Hello {
        fandomat_id: u32,
        device_token: String,
        version: String,
    },
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "SESSION_STARTED")]
    SessionStarted { session_id: SessionId },
    #[serde(rename = "CHECK_BOTTLE")]
    CheckBottle { session_id: SessionId, sku: String },
    #[serde(rename = "BOTTLE_ACCEPTED")]
    BottleAccepted {
        session_id: SessionId,
        code: String,
        material: String,
        timestamp: String,
    },
    #[serde(rename = "SESSION_END")]
    SessionEnd { session_id: SessionId },
}

impl ClientMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Frames sent by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "OK")]
    Ok {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "ERROR")]
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "START_SESSION")]
    StartSession { session_id: SessionId },
    #[serde(rename = "CANCEL_SESSION")]
    CancelSession {
        session_id: SessionId,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "BOTTLE_CHECK_RESULT")]
    BottleCheckResult {
        session_id: SessionId,
        exist: bool,
        #[serde(default)]
        bottle: Option<Bottle>,
    },
}

impl ServerMessage {
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Current time as UTC ISO-8601 with a "Z" suffix, the service's
/// expected timestamp format.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
