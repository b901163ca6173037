//! MPV JSON IPC wire format.
//!
//! Every message is one line of JSON terminated by `\n`. Reads from the
//! socket arrive in arbitrary chunks, so incoming bytes go through a
//! [`LineDecoder`] that holds back the trailing partial line.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

/// Global request ID counter for property snapshot requests.
static REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Generate a unique request ID. Zero is never handed out, mpv uses it for
/// replies to commands that carried no ID.
pub fn next_request_id() -> i64 {
  REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MpvCommand {
  pub command: Vec<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub request_id: Option<i64>,
}

impl MpvCommand {
  /// Fire-and-forget command, passed through unmodified.
  pub fn new(args: Vec<Value>) -> Self {
    Self {
      command: args,
      request_id: None,
    }
  }

  /// Attach a request ID so the reply can be routed back.
  pub fn with_request_id(mut self, request_id: i64) -> Self {
    self.request_id = Some(request_id);
    self
  }

  /// Observe a property for changes.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  /// Snapshot a property value. The reply carries the generated request ID.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()]).with_request_id(next_request_id())
  }

  /// Quit MPV.
  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }

  /// Serialize as one newline-terminated JSON line.
  pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(self)?;
    bytes.push(b'\n');
    Ok(bytes)
  }
}

/// Playback lifecycle notifications that mean the session is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  FileLoaded,
  PlaybackRestart,
}

/// One decoded line of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum IpcMessage {
  /// An observed property changed.
  PropertyChange { name: String, data: Value },
  /// Reply to a command. `request_id` is 0 when the command carried none.
  Reply {
    request_id: i64,
    data: Value,
    error: String,
  },
  Lifecycle(LifecycleEvent),
  /// Any other event mpv emits (end-file, seek, idle, ...).
  Event(String),
}

#[derive(Deserialize)]
struct RawMessage {
  event: Option<String>,
  name: Option<String>,
  data: Option<Value>,
  request_id: Option<i64>,
  error: Option<String>,
}

impl IpcMessage {
  /// Parse a JSON line from MPV.
  pub fn parse(line: &[u8]) -> Result<Self, serde_json::Error> {
    let raw: RawMessage = serde_json::from_slice(line)?;

    if let Some(event) = raw.event {
      return Ok(match event.as_str() {
        "property-change" => IpcMessage::PropertyChange {
          name: raw.name.unwrap_or_default(),
          data: raw.data.unwrap_or(Value::Null),
        },
        "file-loaded" => IpcMessage::Lifecycle(LifecycleEvent::FileLoaded),
        "playback-restart" => IpcMessage::Lifecycle(LifecycleEvent::PlaybackRestart),
        _ => IpcMessage::Event(event),
      });
    }

    Ok(IpcMessage::Reply {
      request_id: raw.request_id.unwrap_or(0),
      data: raw.data.unwrap_or(Value::Null),
      error: raw.error.unwrap_or_else(|| "success".to_string()),
    })
  }
}

/// Split `buffer` on newlines and decode every complete line.
///
/// Returns the decoded messages in arrival order and the trailing bytes
/// after the last newline, which belong to a line not yet complete.
/// Malformed lines are dropped.
pub fn decode(buffer: &[u8]) -> (Vec<IpcMessage>, &[u8]) {
  let mut messages = Vec::new();
  let mut start = 0;

  while let Some(offset) = buffer[start..].iter().position(|b| *b == b'\n') {
    let line = buffer[start..start + offset].trim_ascii();
    start += offset + 1;

    if line.is_empty() {
      continue;
    }

    match IpcMessage::parse(line) {
      Ok(message) => messages.push(message),
      Err(e) => {
        log::warn!(
          "Dropping malformed MPV message: {} - {}",
          e,
          String::from_utf8_lossy(line)
        );
      }
    }
  }

  (messages, &buffer[start..])
}

/// Accumulates socket reads and yields complete messages.
#[derive(Debug, Default)]
pub struct LineDecoder {
  pending: Vec<u8>,
}

impl LineDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a chunk and return every message it completed.
  pub fn feed(&mut self, chunk: &[u8]) -> Vec<IpcMessage> {
    self.pending.extend_from_slice(chunk);

    let (messages, remainder_len) = {
      let (messages, remainder) = decode(&self.pending);
      (messages, remainder.len())
    };

    let consumed = self.pending.len() - remainder_len;
    self.pending.drain(..consumed);
    messages
  }

  /// Bytes of the incomplete trailing line.
  pub fn remainder(&self) -> &[u8] {
    &self.pending
  }
}
