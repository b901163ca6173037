//! Errors returned by the bridge's command surface.

use thiserror::Error;

use crate::config::ConfigError;
use crate::mpv::{IpcError, ProcessError};

#[derive(Error, Debug)]
pub enum BridgeError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
  #[error("No disc loaded, cannot switch title")]
  InvalidSwitch,
  #[error("Not connected")]
  NotConnected,
  #[error("Background task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}
