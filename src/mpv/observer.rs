//! Property observation: registers the fixed property set with MPV and turns
//! inbound notifications into uniform `(key, value)` pairs.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use super::protocol::{IpcMessage, MpvCommand};

/// Properties observed for every session, in registration order.
pub const OBSERVED_PROPERTIES: [&str; 17] = [
  "time-pos",
  "duration",
  "pause",
  "volume",
  "mute",
  "track-list",
  "chapter-list",
  "chapter",
  "video-params",
  "audio-codec-name",
  "video-codec",
  "video-bitrate",
  "audio-bitrate",
  "aid",
  "sid",
  "paused-for-cache",
  "cache-buffering-state",
];

/// What a property event is keyed by: an observed property name, or the
/// request ID of an ad-hoc snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PropertyKey {
  Name(String),
  Request(i64),
}

impl std::fmt::Display for PropertyKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PropertyKey::Name(name) => f.write_str(name),
      PropertyKey::Request(id) => write!(f, "#{}", id),
    }
  }
}

/// Tracks subscriptions and the last value seen for each of them.
#[derive(Debug, Clone)]
pub struct PropertyObserver {
  names: Vec<String>,
  values: HashMap<String, Value>,
}

impl PropertyObserver {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
      values: HashMap::new(),
    }
  }

  /// Observer for [`OBSERVED_PROPERTIES`].
  pub fn standard() -> Self {
    Self::new(OBSERVED_PROPERTIES)
  }

  /// One `observe_property` command per name, IDs assigned from 1 in list
  /// order. The IDs are stable for the observer's lifetime.
  pub fn subscribe_all(&self) -> Vec<MpvCommand> {
    self
      .names
      .iter()
      .enumerate()
      .map(|(i, name)| MpvCommand::observe_property(i as i64 + 1, name))
      .collect()
  }

  /// Observer ID of a subscribed property.
  pub fn id_of(&self, name: &str) -> Option<i64> {
    self
      .names
      .iter()
      .position(|n| n == name)
      .map(|i| i as i64 + 1)
  }

  /// Map an inbound message to a property event, recording the value.
  ///
  /// Property changes for names outside the subscription set and replies
  /// without a request ID yield nothing.
  pub fn interpret(&mut self, message: &IpcMessage) -> Option<(PropertyKey, Value)> {
    match message {
      IpcMessage::PropertyChange { name, data } => {
        if self.id_of(name).is_none() {
          log::debug!("Ignoring change of unobserved property {}", name);
          return None;
        }
        self.values.insert(name.clone(), data.clone());
        Some((PropertyKey::Name(name.clone()), data.clone()))
      }
      IpcMessage::Reply {
        request_id,
        data,
        error,
      } if *request_id != 0 => {
        if error != "success" {
          log::debug!("MPV request {} failed: {}", request_id, error);
        }
        Some((PropertyKey::Request(*request_id), data.clone()))
      }
      _ => None,
    }
  }

  /// Last known value of an observed property.
  pub fn value(&self, name: &str) -> Option<&Value> {
    self.values.get(name)
  }

  /// Forget all recorded values. Subscriptions stay as they are.
  pub fn reset(&mut self) {
    self.values.clear();
  }
}

impl Default for PropertyObserver {
  fn default() -> Self {
    Self::standard()
  }
}
