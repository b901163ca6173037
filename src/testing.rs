//! Test doubles shared by the supervisor and bridge tests.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_channel::Receiver;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::config::AppConfig;
use crate::events::{BridgeEvent, EventKind};
use crate::mpv::{Launcher, ProcessError};

/// Runs a shell script in place of MPV and records every launch.
pub struct FakeLauncher {
  script: Mutex<String>,
  fail: AtomicBool,
  launches: Mutex<Vec<Vec<String>>>,
  pids: Mutex<Vec<u32>>,
}

impl FakeLauncher {
  /// A player that idles until killed.
  pub fn idle() -> Self {
    Self::with_script("exec sleep 30")
  }

  pub fn with_script(script: &str) -> Self {
    Self {
      script: Mutex::new(script.to_string()),
      fail: AtomicBool::new(false),
      launches: Mutex::new(Vec::new()),
      pids: Mutex::new(Vec::new()),
    }
  }

  /// A player binary that cannot be found.
  pub fn missing() -> Self {
    Self {
      fail: AtomicBool::new(true),
      ..Self::idle()
    }
  }

  /// Script for later launches.
  pub fn set_script(&self, script: &str) {
    *self.script.lock() = script.to_string();
  }

  /// Make later launches fail as if the binary went missing.
  pub fn set_failing(&self, fail: bool) {
    self.fail.store(fail, Ordering::SeqCst);
  }

  pub fn launches(&self) -> Vec<Vec<String>> {
    self.launches.lock().clone()
  }

  pub fn pids(&self) -> Vec<u32> {
    self.pids.lock().clone()
  }
}

impl Launcher for FakeLauncher {
  fn launch(&self, args: &[String]) -> Result<Child, ProcessError> {
    self.launches.lock().push(args.to_vec());
    if self.fail.load(Ordering::SeqCst) {
      return Err(ProcessError::NotFound);
    }

    let script = self.script.lock().clone();
    let child = Command::new("sh")
      .arg("-c")
      .arg(script)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;
    if let Some(pid) = child.id() {
      self.pids.lock().push(pid);
    }
    Ok(child)
  }
}

/// Fast timings and an endpoint inside `dir`.
pub fn test_config(dir: &Path) -> AppConfig {
  AppConfig {
    ipc_path: Some(dir.join("mpv.sock").to_string_lossy().into_owned()),
    connect_attempts: 3,
    connect_interval_ms: 5,
    pre_connect_delay_ms: 0,
    switch_pre_connect_delay_ms: 0,
    switch_settle_ms: 10,
    ..AppConfig::default()
  }
}

/// Wait for the next event of `kind`, skipping others.
pub async fn next_event(rx: &Receiver<BridgeEvent>, kind: EventKind) -> Option<BridgeEvent> {
  let wait = async {
    while let Ok(event) = rx.recv().await {
      if event.kind() == kind {
        return Some(event);
      }
    }
    None
  };
  tokio::time::timeout(Duration::from_secs(5), wait).await.ok().flatten()
}

/// Drain whatever is queued right now.
pub fn drain(rx: &Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
  std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
  Path::new(&format!("/proc/{}", pid)).exists()
}
