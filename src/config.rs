//! Application configuration with persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mpv::TitleExtractor;

const CONFIG_DIR: &str = "discplay";
const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to access config file: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid config JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// Control endpoint override (None = per-instance socket/pipe).
  #[serde(default)]
  pub ipc_path: Option<String>,

  #[serde(default = "default_hwdec")]
  pub hwdec: String,

  #[serde(default = "default_vo")]
  pub vo: String,

  /// Audio output backends, tried in order.
  #[serde(default = "default_audio_output")]
  pub audio_output: String,

  /// Audio languages, most preferred first.
  #[serde(default = "default_languages")]
  pub audio_languages: Vec<String>,

  /// Subtitle languages, most preferred first.
  #[serde(default = "default_languages")]
  pub subtitle_languages: Vec<String>,

  /// Connection attempts before giving up on the control endpoint.
  #[serde(default = "default_connect_attempts")]
  pub connect_attempts: u32,

  #[serde(default = "default_connect_interval_ms")]
  pub connect_interval_ms: u64,

  /// Delay between spawn and the first connection attempt.
  #[serde(default)]
  pub pre_connect_delay_ms: u64,

  /// Same, after a title switch. Disc startup is slower.
  #[serde(default = "default_switch_pre_connect_delay_ms")]
  pub switch_pre_connect_delay_ms: u64,

  /// Wait after killing the old process before respawning on the same
  /// endpoint.
  #[serde(default = "default_switch_settle_ms")]
  pub switch_settle_ms: u64,

  /// Regex for disc title announcements (None = built-in pattern). Must
  /// define the groups `edition`, `seq`, `duration` and `playlist`.
  #[serde(default)]
  pub title_pattern: Option<String>,
}

fn default_hwdec() -> String {
  "auto-safe".to_string()
}

fn default_vo() -> String {
  "gpu".to_string()
}

fn default_audio_output() -> String {
  #[cfg(windows)]
  {
    "wasapi".to_string()
  }
  #[cfg(target_os = "macos")]
  {
    "coreaudio".to_string()
  }
  #[cfg(not(any(windows, target_os = "macos")))]
  {
    "pipewire,pulse,alsa".to_string()
  }
}

fn default_languages() -> Vec<String> {
  ["eng", "en", "jpn", "ja"].map(String::from).to_vec()
}

fn default_connect_attempts() -> u32 {
  40
}

fn default_connect_interval_ms() -> u64 {
  100
}

fn default_switch_pre_connect_delay_ms() -> u64 {
  1000
}

fn default_switch_settle_ms() -> u64 {
  500
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      mpv_args: Vec::new(),
      ipc_path: None,
      hwdec: default_hwdec(),
      vo: default_vo(),
      audio_output: default_audio_output(),
      audio_languages: default_languages(),
      subtitle_languages: default_languages(),
      connect_attempts: default_connect_attempts(),
      connect_interval_ms: default_connect_interval_ms(),
      pre_connect_delay_ms: 0,
      switch_pre_connect_delay_ms: default_switch_pre_connect_delay_ms(),
      switch_settle_ms: default_switch_settle_ms(),
      title_pattern: None,
    }
  }
}

impl AppConfig {
  /// Default config file location.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
  }

  /// Load from `path`, falling back to defaults if the file does not exist.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      log::info!("No config at {}, using defaults", path.display());
      return Ok(Self::default());
    }

    let text = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&text)?;
    config.validate().map_err(ConfigError::Invalid)?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
  }

  /// Load from the default location.
  pub fn load() -> Result<Self, ConfigError> {
    match Self::default_path() {
      Some(path) => Self::load_from(&path),
      None => Ok(Self::default()),
    }
  }

  /// Write as pretty JSON, creating parent directories.
  pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
    self.validate().map_err(ConfigError::Invalid)?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    Ok(())
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.connect_attempts == 0 {
      return Err("Connect attempts must be at least 1".to_string());
    }
    if self.connect_interval_ms == 0 {
      return Err("Connect interval must be greater than 0".to_string());
    }
    if self.audio_languages.is_empty() {
      return Err("Audio language list cannot be empty".to_string());
    }
    if self.subtitle_languages.is_empty() {
      return Err("Subtitle language list cannot be empty".to_string());
    }
    if self.mpv_path.as_ref().is_some_and(|p| p.trim().is_empty()) {
      return Err("MPV path cannot be blank".to_string());
    }
    if let Some(pattern) = &self.title_pattern {
      let regex = Regex::new(pattern).map_err(|e| format!("Invalid title pattern: {}", e))?;
      TitleExtractor::with_pattern(regex).map_err(|e| e.to_string())?;
    }
    Ok(())
  }

  pub fn connect_interval(&self) -> Duration {
    Duration::from_millis(self.connect_interval_ms)
  }

  pub fn pre_connect_delay(&self, switching: bool) -> Duration {
    if switching {
      Duration::from_millis(self.switch_pre_connect_delay_ms)
    } else {
      Duration::from_millis(self.pre_connect_delay_ms)
    }
  }

  pub fn switch_settle(&self) -> Duration {
    Duration::from_millis(self.switch_settle_ms)
  }

  /// Title extractor using the configured pattern.
  pub fn title_extractor(&self) -> Result<TitleExtractor, ConfigError> {
    match &self.title_pattern {
      Some(pattern) => {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        TitleExtractor::with_pattern(regex).map_err(|e| ConfigError::Invalid(e.to_string()))
      }
      None => Ok(TitleExtractor::new()),
    }
  }
}
