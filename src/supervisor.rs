//! Player process supervisor.
//!
//! Owns the one running MPV session: builds its command line, spawns it,
//! connects the control channel once the process opens it, and tears the
//! previous session down before a new one starts. Lifecycle requests are
//! serialized so teardown always completes before the next spawn.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::events::{BridgeEvent, CloseReason, EventBus};
use crate::mpv::{
  build_args, cleanup_ipc, unique_ipc_path, DiscTitle, IpcMessage, LaunchSpec, Launcher, MediaSource,
  MpvCommand, MpvIpc, OutputStream, PropertyObserver, TitleExtractor,
};

const OUTPUT_CHUNK: usize = 4096;

/// How long teardown waits for a killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
  Idle,
  /// Process spawned, control channel not up yet.
  Starting,
  Ready,
  /// Process running but the control channel could not be opened.
  Degraded,
  Stopping,
}

/// One spawned player paired with its control channel.
struct PlayerSession {
  id: u64,
  source: MediaSource,
  edition: Option<u32>,
  pid: Option<u32>,
  /// Cancels every task belonging to this session and kills the process.
  shutdown: CancellationToken,
  process_task: JoinHandle<()>,
  ipc: Option<Arc<MpvIpc>>,
}

struct SupervisorState {
  state: PlayerState,
  next_session: u64,
  session: Option<PlayerSession>,
  /// Last disc played, kept for title switches.
  disc: Option<MediaSource>,
  window: Option<i64>,
}

struct Shared {
  config: AppConfig,
  ipc_path: String,
  launcher: Arc<dyn Launcher>,
  bus: EventBus,
  state: Mutex<SupervisorState>,
  titles: Mutex<TitleExtractor>,
  observer: Mutex<PropertyObserver>,
}

impl Shared {
  fn is_current(&self, id: u64) -> bool {
    self
      .state
      .lock()
      .session
      .as_ref()
      .is_some_and(|s| s.id == id)
  }

  /// The process ended on its own. Clears the session if it is still the
  /// current one.
  fn on_process_exit(&self, id: u64, code: Option<i32>) {
    let session = {
      let mut state = self.state.lock();
      if !state.session.as_ref().is_some_and(|s| s.id == id) {
        return;
      }
      state.state = PlayerState::Idle;
      state.session.take()
    };

    if let Some(session) = session {
      if let Some(ipc) = &session.ipc {
        ipc.destroy();
      }
      session.shutdown.cancel();
    }
    self.observer.lock().reset();
    cleanup_ipc(&self.ipc_path);

    log::info!("MPV session {} ended, exit code {:?}", id, code);
    self.bus.publish(BridgeEvent::Closed {
      reason: CloseReason::Exited { code },
    });
  }

  /// Route one inbound message upstream.
  fn dispatch(&self, message: &IpcMessage) {
    if let IpcMessage::Lifecycle(event) = message {
      log::debug!("MPV lifecycle event: {:?}", event);
      self.bus.publish(BridgeEvent::Ready);
      return;
    }

    let property = self.observer.lock().interpret(message);
    if let Some((key, value)) = property {
      self.bus.publish(BridgeEvent::Property { key, value });
    }
  }
}

/// Supervises the external player process.
pub struct Supervisor {
  shared: Arc<Shared>,
  lifecycle: tokio::sync::Mutex<()>,
}

impl Supervisor {
  pub fn new(config: AppConfig, launcher: Arc<dyn Launcher>, bus: EventBus) -> Self {
    let ipc_path = config.ipc_path.clone().unwrap_or_else(unique_ipc_path);
    log::info!("MPV control endpoint: {}", ipc_path);

    let titles = config.title_extractor().unwrap_or_else(|e| {
      log::warn!("{}, using the built-in title pattern", e);
      TitleExtractor::new()
    });

    Self {
      shared: Arc::new(Shared {
        config,
        ipc_path,
        launcher,
        bus,
        state: Mutex::new(SupervisorState {
          state: PlayerState::Idle,
          next_session: 0,
          session: None,
          disc: None,
          window: None,
        }),
        titles: Mutex::new(titles),
        observer: Mutex::new(PropertyObserver::standard()),
      }),
      lifecycle: tokio::sync::Mutex::new(()),
    }
  }

  /// Native handle of the host surface MPV should embed into.
  pub fn set_window(&self, handle: Option<i64>) {
    self.shared.state.lock().window = handle;
  }

  /// Play `path`, replacing any running session.
  pub async fn play(&self, path: &Path) -> Result<(), BridgeError> {
    let _guard = self.lifecycle.lock().await;

    let owned = path.to_path_buf();
    let source = tokio::task::spawn_blocking(move || MediaSource::probe(&owned)).await?;
    log::info!(
      "Playing {} as {:?} (size {:?})",
      source.path.display(),
      source.mode,
      source.size
    );

    self.teardown().await;
    self.shared.titles.lock().clear();
    self.launch(source, None, false).await
  }

  /// Restart the current disc on another edition.
  pub async fn switch_title(&self, edition: u32) -> Result<(), BridgeError> {
    let _guard = self.lifecycle.lock().await;

    let disc = self
      .shared
      .state
      .lock()
      .disc
      .clone()
      .ok_or(BridgeError::InvalidSwitch)?;

    log::info!("Switching to edition {} on {}", edition, disc.path.display());
    self.shared.bus.publish(BridgeEvent::Switching { edition });
    self.teardown().await;

    // MPV gives no signal once the old instance has released the endpoint
    tokio::time::sleep(self.shared.config.switch_settle()).await;

    self.launch(disc, Some(edition), true).await
  }

  /// Stop playback and forget the disc.
  pub async fn stop(&self) {
    let _guard = self.lifecycle.lock().await;

    self.shared.state.lock().state = PlayerState::Stopping;
    self.teardown().await;
    self.shared.titles.lock().clear();
    {
      let mut state = self.shared.state.lock();
      state.disc = None;
      state.state = PlayerState::Idle;
    }

    log::info!("MPV stopped");
    self.shared.bus.publish(BridgeEvent::Closed {
      reason: CloseReason::Stopped,
    });
  }

  /// Kill the current process and destroy its channel, if any.
  async fn teardown(&self) {
    let Some(session) = self.shared.state.lock().session.take() else {
      return;
    };
    log::info!("Tearing down MPV session {} (pid {:?})", session.id, session.pid);

    if let Some(ipc) = &session.ipc {
      ipc.destroy();
    }
    session.shutdown.cancel();

    match tokio::time::timeout(REAP_TIMEOUT, session.process_task).await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => log::error!("MPV process task failed: {}", e),
      Err(_) => log::warn!("MPV process {:?} was not reaped in time", session.pid),
    }

    self.shared.observer.lock().reset();
    cleanup_ipc(&self.shared.ipc_path);
  }

  async fn launch(&self, source: MediaSource, edition: Option<u32>, switching: bool) -> Result<(), BridgeError> {
    let shared = &self.shared;
    let window = shared.state.lock().window;
    let args = build_args(
      &LaunchSpec {
        source: &source,
        edition,
        window,
        ipc_path: &shared.ipc_path,
      },
      &shared.config,
    );

    shared.titles.lock().reset_log();

    let mut child = match shared.launcher.launch(&args) {
      Ok(child) => child,
      Err(e) => {
        log::error!("Failed to start MPV: {}", e);
        {
          let mut state = shared.state.lock();
          state.state = PlayerState::Idle;
          if !switching {
            state.disc = None;
          }
        }
        shared.bus.publish(BridgeEvent::Error {
          message: e.to_string(),
        });
        return Err(e.into());
      }
    };

    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let shutdown = CancellationToken::new();

    let id = {
      let mut state = shared.state.lock();
      state.next_session += 1;
      let id = state.next_session;

      // Registered under the lock so an instant exit still finds its session
      let process_task = tokio::spawn(watch_process(shared.clone(), id, child, shutdown.clone()));

      state.disc = source.is_disc().then(|| source.clone());
      state.session = Some(PlayerSession {
        id,
        source,
        edition,
        pid,
        shutdown: shutdown.clone(),
        process_task,
        ipc: None,
      });
      state.state = PlayerState::Starting;
      id
    };
    log::info!("MPV session {} started (pid {:?})", id, pid);

    if let Some(stdout) = stdout {
      tokio::spawn(scan_output(shared.clone(), id, OutputStream::Stdout, stdout, shutdown.clone()));
    }
    if let Some(stderr) = stderr {
      tokio::spawn(scan_output(shared.clone(), id, OutputStream::Stderr, stderr, shutdown.clone()));
    }

    let delay = shared.config.pre_connect_delay(switching);
    tokio::spawn(connect_session(shared.clone(), id, delay, shutdown));

    Ok(())
  }

  /// Send a command over the current control channel.
  pub fn send(&self, cmd: &MpvCommand) -> Result<(), BridgeError> {
    let ipc = self
      .shared
      .state
      .lock()
      .session
      .as_ref()
      .and_then(|s| s.ipc.clone())
      .ok_or(BridgeError::NotConnected)?;
    ipc.send(cmd)?;
    Ok(())
  }

  pub fn state(&self) -> PlayerState {
    self.shared.state.lock().state
  }

  pub fn is_active(&self) -> bool {
    self.shared.state.lock().session.is_some()
  }

  pub fn has_channel(&self) -> bool {
    self
      .shared
      .state
      .lock()
      .session
      .as_ref()
      .is_some_and(|s| s.ipc.is_some())
  }

  pub fn active_pid(&self) -> Option<u32> {
    self.shared.state.lock().session.as_ref().and_then(|s| s.pid)
  }

  /// Source path and edition of the running session.
  pub fn now_playing(&self) -> Option<(PathBuf, Option<u32>)> {
    self
      .shared
      .state
      .lock()
      .session
      .as_ref()
      .map(|s| (s.source.path.clone(), s.edition))
  }

  /// Disc remembered for title switches.
  pub fn disc(&self) -> Option<MediaSource> {
    self.shared.state.lock().disc.clone()
  }

  pub fn titles(&self) -> Vec<DiscTitle> {
    self.shared.titles.lock().titles().to_vec()
  }

  pub fn property(&self, name: &str) -> Option<Value> {
    self.shared.observer.lock().value(name).cloned()
  }

  pub fn ipc_path(&self) -> &str {
    &self.shared.ipc_path
  }
}

/// Owns the child: reports a natural exit, or kills and reaps it when the
/// session is shut down.
async fn watch_process(shared: Arc<Shared>, id: u64, mut child: Child, shutdown: CancellationToken) {
  tokio::select! {
    status = child.wait() => {
      let code = match status {
        Ok(status) => {
          log::info!("MPV process exited with: {}", status);
          status.code()
        }
        Err(e) => {
          log::error!("wait() failed: {}", e);
          None
        }
      };
      shared.on_process_exit(id, code);
    }
    _ = shutdown.cancelled() => {
      match child.kill().await {
        Ok(()) => log::info!("MPV process of session {} killed", id),
        Err(e) => log::error!("kill() failed: {}", e),
      }
    }
  }
}

/// Feed process output to the title extractor, publishing list changes.
async fn scan_output<R: AsyncRead + Unpin>(
  shared: Arc<Shared>,
  id: u64,
  stream: OutputStream,
  mut reader: R,
  shutdown: CancellationToken,
) {
  let mut buf = vec![0u8; OUTPUT_CHUNK];

  loop {
    let read = tokio::select! {
      _ = shutdown.cancelled() => break,
      read = reader.read(&mut buf) => read,
    };
    let n = match read {
      Ok(0) => break,
      Ok(n) => n,
      Err(e) => {
        log::debug!("MPV {:?} read error: {}", stream, e);
        break;
      }
    };

    let text = String::from_utf8_lossy(&buf[..n]);
    log::trace!("mpv {:?}: {}", stream, text.trim_end());

    let published = {
      // Checked under the titles lock so a torn-down session cannot feed
      // after the list was cleared
      let mut extractor = shared.titles.lock();
      if !shared.is_current(id) {
        break;
      }
      extractor.feed(stream, &text)
    };
    if let Some(titles) = published {
      shared.bus.publish(BridgeEvent::TitleList { titles });
    }
  }
}

/// Connect the control channel, subscribe, and pump messages until the
/// session ends.
async fn connect_session(shared: Arc<Shared>, id: u64, delay: Duration, shutdown: CancellationToken) {
  let connect = async {
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    MpvIpc::connect(
      &shared.ipc_path,
      shared.config.connect_attempts,
      shared.config.connect_interval(),
    )
    .await
  };

  let result = tokio::select! {
    _ = shutdown.cancelled() => {
      log::debug!("Connect for session {} cancelled", id);
      return;
    }
    result = connect => result,
  };

  let ipc = match result {
    Ok(ipc) => Arc::new(ipc),
    Err(e) => {
      log::error!("MPV session {}: {}", id, e);
      let current = {
        let mut state = shared.state.lock();
        let current = state.session.as_ref().is_some_and(|s| s.id == id);
        if current {
          state.state = PlayerState::Degraded;
        }
        current
      };
      if current {
        shared.bus.publish(BridgeEvent::Error {
          message: e.to_string(),
        });
      }
      return;
    }
  };

  let subscriptions = shared.observer.lock().subscribe_all();
  for cmd in subscriptions {
    if let Err(e) = ipc.send(&cmd) {
      log::warn!("Failed to observe {:?}: {}", cmd.command.get(2), e);
    }
  }

  let attached = {
    let mut guard = shared.state.lock();
    let state = &mut *guard;
    match state.session.as_mut() {
      Some(session) if session.id == id => {
        session.ipc = Some(ipc.clone());
        state.state = PlayerState::Ready;
        true
      }
      _ => false,
    }
  };
  if !attached {
    ipc.destroy();
    return;
  }

  log::info!("MPV session {} ready", id);
  shared.bus.publish(BridgeEvent::Ready);

  let messages = ipc.messages();
  loop {
    let message = tokio::select! {
      _ = shutdown.cancelled() => break,
      message = messages.recv() => match message {
        Ok(message) => message,
        Err(_) => break,
      },
    };
    shared.dispatch(&message);
  }
  log::debug!("MPV session {} message pump finished", id);
}
