//! MPV command line construction.
//!
//! Decides how a source is handed to MPV (disc folder, disc image or plain
//! file) and sizes the demuxer cache from the input size.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::AppConfig;

const GIB: u64 = 1024 * 1024 * 1024;

/// Disc images above this size are treated as Blu-ray, the rest as DVD.
const BLURAY_IMAGE_THRESHOLD: u64 = 10 * GIB;

const BLURAY_MARKER: &str = "BDMV";
const DVD_MARKER: &str = "VIDEO_TS";

/// How the source is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscMode {
  None,
  Bluray,
  Dvd,
}

/// A resolved media source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
  /// Disc device path for disc modes, the media path otherwise.
  pub path: PathBuf,
  pub mode: DiscMode,
  /// Input size in bytes, if it could be determined.
  pub size: Option<u64>,
}

impl MediaSource {
  /// Inspect the filesystem and classify `path`.
  pub fn probe(path: &Path) -> Self {
    let marker = disc_marker(path);
    let sized = marker.as_ref().map(|(_, root)| root.as_path()).unwrap_or(path);
    let size = input_size(sized);
    Self::classify(path, marker, size)
  }

  /// Classify a source from already-gathered facts.
  ///
  /// Priority: disc folder marker, then disc image extension (split by
  /// size), then plain file.
  pub fn classify(path: &Path, marker: Option<(DiscMode, PathBuf)>, size: Option<u64>) -> Self {
    if let Some((mode, device)) = marker {
      return Self {
        path: device,
        mode,
        size,
      };
    }

    let is_image = path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext.eq_ignore_ascii_case("iso"));

    let mode = if !is_image {
      DiscMode::None
    } else if size.is_some_and(|s| s > BLURAY_IMAGE_THRESHOLD) {
      DiscMode::Bluray
    } else {
      DiscMode::Dvd
    };

    Self {
      path: path.to_path_buf(),
      mode,
      size,
    }
  }

  pub fn is_disc(&self) -> bool {
    self.mode != DiscMode::None
  }
}

/// Find a disc folder marker: either `path` contains `BDMV`/`VIDEO_TS`, or
/// `path` is that folder itself. Returns the mode and the disc root.
fn disc_marker(path: &Path) -> Option<(DiscMode, PathBuf)> {
  if !path.is_dir() {
    return None;
  }

  for (marker, mode) in [(BLURAY_MARKER, DiscMode::Bluray), (DVD_MARKER, DiscMode::Dvd)] {
    if path.join(marker).is_dir() {
      return Some((mode, path.to_path_buf()));
    }
    let is_marker = path
      .file_name()
      .and_then(|name| name.to_str())
      .is_some_and(|name| name.eq_ignore_ascii_case(marker));
    if is_marker {
      let root = path.parent().unwrap_or(path).to_path_buf();
      return Some((mode, root));
    }
  }

  None
}

/// File size, or the recursive size of a folder.
fn input_size(path: &Path) -> Option<u64> {
  let meta = std::fs::metadata(path).ok()?;
  if meta.is_file() {
    return Some(meta.len());
  }

  let total = walkdir::WalkDir::new(path)
    .into_iter()
    .filter_map(Result::ok)
    .filter_map(|entry| entry.metadata().ok())
    .filter(|meta| meta.is_file())
    .map(|meta| meta.len())
    .sum();
  Some(total)
}

/// Demuxer cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTier {
  pub cache_mib: u64,
  pub readahead_secs: u64,
}

impl CacheTier {
  pub const DEFAULT: Self = Self {
    cache_mib: 150,
    readahead_secs: 20,
  };
  pub const MEDIUM: Self = Self {
    cache_mib: 300,
    readahead_secs: 40,
  };
  pub const LARGE: Self = Self {
    cache_mib: 500,
    readahead_secs: 60,
  };
  /// Used when the input size is unknown.
  pub const FALLBACK: Self = Self {
    cache_mib: 100,
    readahead_secs: 15,
  };

  pub fn for_size(size: Option<u64>) -> Self {
    match size {
      None => Self::FALLBACK,
      Some(s) if s < 5 * GIB => Self::DEFAULT,
      Some(s) if s <= 10 * GIB => Self::MEDIUM,
      Some(_) => Self::LARGE,
    }
  }
}

/// Everything needed to build one launch's argument vector.
#[derive(Debug, Clone)]
pub struct LaunchSpec<'a> {
  pub source: &'a MediaSource,
  /// Edition to select on a disc, set when switching titles.
  pub edition: Option<u32>,
  /// Native handle of the host surface to embed into.
  pub window: Option<i64>,
  pub ipc_path: &'a str,
}

/// Build the MPV argument vector.
pub fn build_args(spec: &LaunchSpec<'_>, config: &AppConfig) -> Vec<String> {
  let mut args = Vec::new();

  if let Some(wid) = spec.window {
    args.push(format!("--wid={}", wid));
  }
  args.push(format!("--input-ipc-server={}", spec.ipc_path));

  // Chrome is drawn by the host
  args.push("--no-border".into());
  args.push("--no-osc".into());
  args.push("--force-window=yes".into());

  args.push(format!("--hwdec={}", config.hwdec));
  args.push(format!("--vo={}", config.vo));

  args.extend(
    [
      "--scale=ewa_lanczossharp",
      "--cscale=ewa_lanczossharp",
      "--dscale=mitchell",
      "--deband=yes",
      "--interpolation=yes",
      "--tscale=oversample",
      "--video-sync=display-resample",
    ]
    .map(String::from),
  );

  args.push(format!("--ao={}", config.audio_output));
  args.push("--audio-fallback-to-null=yes".into());

  args.push(format!("--alang={}", config.audio_languages.join(",")));
  args.push(format!("--slang={}", config.subtitle_languages.join(",")));

  let tier = CacheTier::for_size(spec.source.size);
  args.push("--cache=yes".into());
  args.push(format!("--demuxer-max-bytes={}MiB", tier.cache_mib));
  args.push(format!("--demuxer-readahead-secs={}", tier.readahead_secs));

  args.extend(config.mpv_args.iter().cloned());

  let device = spec.source.path.display();
  match spec.source.mode {
    DiscMode::Bluray => {
      args.push("--msg-level=bd=v".into());
      args.push(format!("--bluray-device={}", device));
      if let Some(edition) = spec.edition {
        args.push(format!("--edition={}", edition));
      }
      args.push("bluray://longest".into());
    }
    DiscMode::Dvd => {
      args.push("--msg-level=dvdnav=v".into());
      args.push(format!("--dvd-device={}", device));
      if let Some(edition) = spec.edition {
        args.push(format!("--edition={}", edition));
      }
      args.push("dvd://longest".into());
    }
    DiscMode::None => {
      args.push(spec.source.path.to_string_lossy().into_owned());
    }
  }

  args
}

#[cfg(test)]
mod tests {
  use super::*;

  fn launch(source: &MediaSource, edition: Option<u32>) -> Vec<String> {
    let spec = LaunchSpec {
      source,
      edition,
      window: Some(4242),
      ipc_path: "/tmp/discplay-test.sock",
    };
    build_args(&spec, &AppConfig::default())
  }

  #[test]
  fn test_cache_tiers() {
    assert_eq!(CacheTier::for_size(None), CacheTier::FALLBACK);
    assert_eq!(CacheTier::for_size(Some(GIB)), CacheTier::DEFAULT);
    assert_eq!(CacheTier::for_size(Some(5 * GIB)), CacheTier::MEDIUM);
    assert_eq!(CacheTier::for_size(Some(10 * GIB)), CacheTier::MEDIUM);
    assert_eq!(CacheTier::for_size(Some(10 * GIB + 1)), CacheTier::LARGE);
  }

  #[test]
  fn test_large_bluray_folder() {
    let source = MediaSource::classify(
      Path::new("/media/movie"),
      Some((DiscMode::Bluray, PathBuf::from("/media/movie"))),
      Some(12 * GIB),
    );
    let args = launch(&source, None);

    assert!(args.contains(&"--demuxer-max-bytes=500MiB".to_string()));
    assert!(args.contains(&"--demuxer-readahead-secs=60".to_string()));
    assert!(args.contains(&"--bluray-device=/media/movie".to_string()));
    assert!(!args.iter().any(|a| a.starts_with("--dvd-device")));
    assert!(!args.iter().any(|a| a.starts_with("--edition")));
    assert_eq!(args.last().map(String::as_str), Some("bluray://longest"));
  }

  #[test]
  fn test_iso_mode_depends_on_size() {
    let big = MediaSource::classify(Path::new("/iso/film.ISO"), None, Some(25 * GIB));
    assert_eq!(big.mode, DiscMode::Bluray);

    let small = MediaSource::classify(Path::new("/iso/film.iso"), None, Some(4 * GIB));
    assert_eq!(small.mode, DiscMode::Dvd);

    let edge = MediaSource::classify(Path::new("/iso/film.iso"), None, Some(10 * GIB));
    assert_eq!(edge.mode, DiscMode::Dvd);

    let args = launch(&small, Some(3));
    assert!(args.contains(&"--dvd-device=/iso/film.iso".to_string()));
    assert!(args.contains(&"--edition=3".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("dvd://longest"));
  }

  #[test]
  fn test_plain_file() {
    let source = MediaSource::classify(Path::new("/videos/clip.mkv"), None, Some(700 * 1024 * 1024));
    assert!(!source.is_disc());

    let args = launch(&source, None);
    assert_eq!(args.last().map(String::as_str), Some("/videos/clip.mkv"));
    assert!(args.contains(&"--wid=4242".to_string()));
    assert!(args.contains(&"--input-ipc-server=/tmp/discplay-test.sock".to_string()));
    assert!(args.contains(&"--audio-fallback-to-null=yes".to_string()));
    assert!(args.contains(&"--demuxer-max-bytes=150MiB".to_string()));
    assert!(!args.iter().any(|a| a.contains("://")));
  }

  #[test]
  fn test_language_lists_keep_rank() {
    let mut config = AppConfig::default();
    config.audio_languages = vec!["jpn".into(), "eng".into()];
    config.subtitle_languages = vec!["eng".into()];
    config.mpv_args = vec!["--volume=50".into()];

    let source = MediaSource::classify(Path::new("/v.mkv"), None, None);
    let spec = LaunchSpec {
      source: &source,
      edition: None,
      window: None,
      ipc_path: "/tmp/x.sock",
    };
    let args = build_args(&spec, &config);

    assert!(args.contains(&"--alang=jpn,eng".to_string()));
    assert!(args.contains(&"--slang=eng".to_string()));
    assert!(args.contains(&"--volume=50".to_string()));
    assert!(args.contains(&"--demuxer-max-bytes=100MiB".to_string()));
    assert!(!args.iter().any(|a| a.starts_with("--wid")));
  }

  #[test]
  fn test_probe_detects_disc_folders() {
    let dir = tempfile::tempdir().unwrap();

    let bluray = dir.path().join("bd");
    std::fs::create_dir_all(bluray.join("BDMV").join("PLAYLIST")).unwrap();
    std::fs::write(bluray.join("BDMV").join("index.bdmv"), vec![0u8; 2048]).unwrap();
    let probed = MediaSource::probe(&bluray);
    assert_eq!(probed.mode, DiscMode::Bluray);
    assert_eq!(probed.path, bluray);
    assert_eq!(probed.size, Some(2048));

    let probed = MediaSource::probe(&bluray.join("BDMV"));
    assert_eq!(probed.mode, DiscMode::Bluray);
    assert_eq!(probed.path, bluray);

    let dvd = dir.path().join("dvd");
    std::fs::create_dir_all(dvd.join("VIDEO_TS")).unwrap();
    assert_eq!(MediaSource::probe(&dvd).mode, DiscMode::Dvd);

    let file = dir.path().join("clip.mkv");
    std::fs::write(&file, b"data").unwrap();
    let probed = MediaSource::probe(&file);
    assert_eq!(probed.mode, DiscMode::None);
    assert_eq!(probed.size, Some(4));
  }
}
