//! mpv JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command sent to mpv over IPC.
///
/// `request_id` must be nonzero: mpv replies to an async request with
/// `request_id` 0 in a shape we would misclassify as an event, and the
/// caller would wait forever.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  /// Command name followed by its arguments.
  pub command: Vec<Value>,
  pub request_id: u16,
  /// Always true; lets mpv answer commands out of order.
  #[serde(rename = "async")]
  pub asynchronous: bool,
}

impl MpvCommand {
  /// Build a command from a name and its parameters.
  pub fn new(name: &str, params: &[Value], request_id: u16) -> Self {
    let mut command = Vec::with_capacity(params.len() + 1);
    command.push(name.into());
    command.extend_from_slice(params);
    Self {
      command,
      request_id,
      asynchronous: true,
    }
  }

  /// Serialize to the wire format: compact JSON plus a trailing newline.
  pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(self)?;
    line.push(b'\n');
    Ok(line)
  }
}

/// Response from mpv for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or an error message.
  pub error: String,
  /// Response data (command-specific).
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: u16,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Event sent by mpv (property changes, playback events, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "idle").
  #[serde(default)]
  pub event: String,
  /// Observer ID for property-change events.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  /// Property name for property-change events.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  /// Event data.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

/// Message received from mpv IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Classify one line from mpv.
  ///
  /// A message carrying a nonzero `request_id` is a response to an
  /// earlier command; everything else is an event. Presence of that
  /// field is the only dispatch rule the protocol gives us.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    let request_id = value.get("request_id").and_then(Value::as_u64).unwrap_or(0);
    if request_id != 0 {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    }
  }
}
