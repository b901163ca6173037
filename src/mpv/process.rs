//! MPV process detection and spawning.

use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

/// Get the IPC socket/pipe path for an instance name.
pub fn ipc_path(instance: &str) -> String {
  #[cfg(windows)]
  {
    format!(r"\\.\pipe\discplay-{}", instance)
  }
  #[cfg(not(windows))]
  {
    std::env::temp_dir()
      .join(format!("discplay-{}.sock", instance))
      .to_string_lossy()
      .into_owned()
  }
}

/// A fresh endpoint path, unique to this bridge instance.
pub fn unique_ipc_path() -> String {
  ipc_path(&uuid::Uuid::new_v4().simple().to_string())
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
    r"C:\mpv\mpv.exe",
  ];
  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths.iter().map(|p| PathBuf::from(*p)).find(|p| p.exists())
}

/// Starts the player process. The supervisor only ever talks to this seam,
/// so tests can stand in a harmless process.
pub trait Launcher: Send + Sync {
  /// Spawn with stdout and stderr piped.
  fn launch(&self, args: &[String]) -> Result<Child, ProcessError>;
}

/// Launches the real MPV binary.
#[derive(Debug, Clone, Default)]
pub struct MpvLauncher {
  mpv_path: Option<PathBuf>,
}

impl MpvLauncher {
  pub fn new(mpv_path: Option<PathBuf>) -> Self {
    Self { mpv_path }
  }
}

impl Launcher for MpvLauncher {
  fn launch(&self, args: &[String]) -> Result<Child, ProcessError> {
    let mpv_exe = self
      .mpv_path
      .clone()
      .or_else(find_mpv)
      .ok_or(ProcessError::NotFound)?;

    log::info!("Spawning MPV: {:?}", mpv_exe);
    log::debug!("MPV args: {:?}", args);

    let child = Command::new(&mpv_exe)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    Ok(child)
  }
}

/// Remove a stale socket left behind by a killed process.
pub fn cleanup_ipc(path: &str) {
  #[cfg(not(windows))]
  {
    let _ = std::fs::remove_file(path);
  }
  // Windows named pipes are cleaned up automatically
  #[cfg(windows)]
  let _ = path;
}
