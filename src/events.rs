//! Bridge events and the publish/subscribe bus that carries them to the UI.
//!
//! Any number of listeners can coexist: callbacks registered per event kind
//! run in registration order, and channel listeners receive every event.

use std::sync::Arc;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::mpv::{DiscTitle, PropertyKey};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
  /// Explicit stop request.
  Stopped,
  /// The player exited on its own.
  Exited { code: Option<i32> },
}

/// Everything the bridge reports upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeEvent {
  /// Control channel is up, or the player loaded/restarted playback.
  Ready,
  /// Observed property changed, or a snapshot request was answered.
  Property { key: PropertyKey, value: Value },
  Closed { reason: CloseReason },
  TitleList { titles: Vec<DiscTitle> },
  /// A title switch started; the current player is going away.
  Switching { edition: u32 },
  /// Host window wants to close while a session is active.
  ConfirmExit,
  Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Ready,
  Property,
  Closed,
  TitleList,
  Switching,
  ConfirmExit,
  Error,
}

impl BridgeEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      BridgeEvent::Ready => EventKind::Ready,
      BridgeEvent::Property { .. } => EventKind::Property,
      BridgeEvent::Closed { .. } => EventKind::Closed,
      BridgeEvent::TitleList { .. } => EventKind::TitleList,
      BridgeEvent::Switching { .. } => EventKind::Switching,
      BridgeEvent::ConfirmExit => EventKind::ConfirmExit,
      BridgeEvent::Error { .. } => EventKind::Error,
    }
  }
}

/// Handle returned by subscribe calls, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
  Callback(Callback),
  Channel(Sender<BridgeEvent>),
}

struct Subscriber {
  id: SubscriptionId,
  /// None receives every kind.
  kind: Option<EventKind>,
  sink: Sink,
}

#[derive(Default)]
struct BusState {
  next_id: u64,
  subscribers: Vec<Subscriber>,
}

/// Multi-subscriber event bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
  state: Arc<Mutex<BusState>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  fn add(&self, kind: Option<EventKind>, sink: Sink) -> SubscriptionId {
    let mut state = self.state.lock();
    state.next_id += 1;
    let id = SubscriptionId(state.next_id);
    state.subscribers.push(Subscriber { id, kind, sink });
    id
  }

  /// Call `f` for every event of `kind`.
  pub fn subscribe<F>(&self, kind: EventKind, f: F) -> SubscriptionId
  where
    F: Fn(&BridgeEvent) + Send + Sync + 'static,
  {
    self.add(Some(kind), Sink::Callback(Arc::new(f)))
  }

  /// Call `f` for every event.
  pub fn subscribe_all<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn(&BridgeEvent) + Send + Sync + 'static,
  {
    self.add(None, Sink::Callback(Arc::new(f)))
  }

  /// Receive every event through a channel. The subscription is dropped
  /// once the receiver is gone.
  pub fn listen(&self) -> (SubscriptionId, Receiver<BridgeEvent>) {
    let (tx, rx) = async_channel::unbounded();
    (self.add(None, Sink::Channel(tx)), rx)
  }

  /// Returns `false` if the subscription did not exist.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut state = self.state.lock();
    let before = state.subscribers.len();
    state.subscribers.retain(|s| s.id != id);
    state.subscribers.len() != before
  }

  pub fn subscriber_count(&self) -> usize {
    self.state.lock().subscribers.len()
  }

  /// Deliver `event` to matching subscribers in registration order.
  ///
  /// Callbacks run without the bus lock held, so they may subscribe or
  /// unsubscribe.
  pub fn publish(&self, event: BridgeEvent) {
    let kind = event.kind();
    let sinks: Vec<(SubscriptionId, Sink)> = {
      let state = self.state.lock();
      state
        .subscribers
        .iter()
        .filter(|s| s.kind.map_or(true, |k| k == kind))
        .map(|s| (s.id, s.sink.clone()))
        .collect()
    };

    let mut closed = Vec::new();
    for (id, sink) in sinks {
      match sink {
        Sink::Callback(f) => f(&event),
        Sink::Channel(tx) => {
          if tx.try_send(event.clone()).is_err() {
            closed.push(id);
          }
        }
      }
    }

    if !closed.is_empty() {
      self
        .state
        .lock()
        .subscribers
        .retain(|s| !closed.contains(&s.id));
    }
  }
}

impl std::fmt::Debug for EventBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventBus")
      .field("subscribers", &self.subscriber_count())
      .finish()
  }
}
