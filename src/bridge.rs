//! The command and event surface the UI talks to.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_channel::Receiver;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::events::{BridgeEvent, CloseReason, EventBus, EventKind, SubscriptionId};
use crate::mpv::{cleanup_ipc, DiscTitle, Launcher, MpvCommand, MpvLauncher, PropertyKey};
use crate::supervisor::{PlayerState, Supervisor};

/// MPV bridge: one player session at a time, any number of listeners.
pub struct Bridge {
  supervisor: Supervisor,
  bus: EventBus,
}

impl Bridge {
  /// Bridge driving the real MPV binary.
  pub fn new(config: AppConfig) -> Self {
    let launcher = MpvLauncher::new(config.mpv_path.as_ref().filter(|p| !p.is_empty()).map(PathBuf::from));
    Self::with_launcher(config, Arc::new(launcher))
  }

  pub fn with_launcher(config: AppConfig, launcher: Arc<dyn Launcher>) -> Self {
    let bus = EventBus::new();
    Self {
      supervisor: Supervisor::new(config, launcher, bus.clone()),
      bus,
    }
  }

  /// Native window handle to embed the video into. Applies from the next
  /// spawn.
  pub fn set_window_handle(&self, handle: Option<i64>) {
    self.supervisor.set_window(handle);
  }

  /// Ask the host for a source with `pick` and play it. Returns the chosen
  /// path, or `None` when the user cancelled.
  pub async fn open_source<F, Fut>(&self, pick: F) -> Result<Option<PathBuf>, BridgeError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Option<PathBuf>>,
  {
    let Some(path) = pick().await else {
      log::debug!("Source selection cancelled");
      return Ok(None);
    };
    self.play(&path).await?;
    Ok(Some(path))
  }

  pub async fn play(&self, path: &Path) -> Result<(), BridgeError> {
    self.supervisor.play(path).await
  }

  pub async fn stop(&self) {
    self.supervisor.stop().await;
  }

  /// Restart the current disc on `edition`. Fails without touching the
  /// player if no disc is loaded.
  pub async fn switch_title(&self, edition: u32) -> Result<(), BridgeError> {
    self.supervisor.switch_title(edition).await
  }

  /// Forward `args` to MPV as-is.
  pub fn send_command(&self, args: Vec<Value>) -> Result<(), BridgeError> {
    self.supervisor.send(&MpvCommand::new(args))
  }

  /// Ask for the current value of `name`. The answer arrives as a property
  /// event keyed by the returned request ID.
  pub fn request_property(&self, name: &str) -> Result<i64, BridgeError> {
    let cmd = MpvCommand::get_property(name);
    let request_id = cmd.request_id.unwrap_or_default();
    self.supervisor.send(&cmd)?;
    Ok(request_id)
  }

  /// Last value reported for an observed property.
  pub fn property(&self, name: &str) -> Option<Value> {
    self.supervisor.property(name)
  }

  pub fn titles(&self) -> Vec<DiscTitle> {
    self.supervisor.titles()
  }

  pub fn state(&self) -> PlayerState {
    self.supervisor.state()
  }

  pub fn is_connected(&self) -> bool {
    self.supervisor.has_channel()
  }

  pub fn on_ready<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.bus.subscribe(EventKind::Ready, move |_| f())
  }

  pub fn on_property<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn(&PropertyKey, &Value) + Send + Sync + 'static,
  {
    self.bus.subscribe(EventKind::Property, move |event| {
      if let BridgeEvent::Property { key, value } = event {
        f(key, value);
      }
    })
  }

  pub fn on_closed<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn(&CloseReason) + Send + Sync + 'static,
  {
    self.bus.subscribe(EventKind::Closed, move |event| {
      if let BridgeEvent::Closed { reason } = event {
        f(reason);
      }
    })
  }

  pub fn on_title_list<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn(&[DiscTitle]) + Send + Sync + 'static,
  {
    self.bus.subscribe(EventKind::TitleList, move |event| {
      if let BridgeEvent::TitleList { titles } = event {
        f(titles);
      }
    })
  }

  pub fn on_switching<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn(u32) + Send + Sync + 'static,
  {
    self.bus.subscribe(EventKind::Switching, move |event| {
      if let BridgeEvent::Switching { edition } = event {
        f(*edition);
      }
    })
  }

  pub fn on_confirm_exit<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.bus.subscribe(EventKind::ConfirmExit, move |_| f())
  }

  pub fn on_error<F>(&self, f: F) -> SubscriptionId
  where
    F: Fn(&str) + Send + Sync + 'static,
  {
    self.bus.subscribe(EventKind::Error, move |event| {
      if let BridgeEvent::Error { message } = event {
        f(message);
      }
    })
  }

  /// Every event, through a channel.
  pub fn listen(&self) -> (SubscriptionId, Receiver<BridgeEvent>) {
    self.bus.listen()
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.bus.unsubscribe(id)
  }

  pub fn events(&self) -> &EventBus {
    &self.bus
  }

  /// The host window wants to close. Returns `true` if nothing is playing;
  /// otherwise asks the UI to confirm and returns `false`.
  pub fn request_close(&self) -> bool {
    if !self.supervisor.is_active() {
      return true;
    }
    log::info!("Close requested during playback, asking for confirmation");
    self.bus.publish(BridgeEvent::ConfirmExit);
    false
  }

  /// Stop playback and release the control endpoint.
  pub async fn shutdown(&self) {
    if self.supervisor.is_active() {
      self.supervisor.stop().await;
    }
    cleanup_ipc(self.supervisor.ipc_path());
    log::info!("Bridge shut down");
  }
}
