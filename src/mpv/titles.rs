//! Disc title discovery from MPV's diagnostic output.
//!
//! MPV does not expose the disc's title table over IPC, but it prints one
//! line per title while opening a disc. The extractor keeps the output seen
//! so far and rescans all of it on every read, since an announcement can be
//! split across two reads.

use std::num::IntErrorKind;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Matches lines such as
/// `[bd] edition: 3 idx: 4 duration: 1:45:23 (playlist: 00801.mpls)`.
pub const DEFAULT_TITLE_PATTERN: &str = r"(?m)edition:?[ \t]*(?P<edition>\d+)[^\d\n]*?idx:?[ \t]*(?P<seq>\d+)[^\d\n]*?duration:?[ \t]*(?P<duration>\d+(?::\d{1,2})+)[^\n]*?(?P<playlist>[\w-]+\.mpls)";

/// Output past this size is ignored; title announcements come in the
/// startup banner.
const MAX_LOG_BYTES: usize = 4 * 1024 * 1024;

const GROUPS: [&str; 4] = ["edition", "seq", "duration", "playlist"];

static DEFAULT_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(DEFAULT_TITLE_PATTERN).expect("default title pattern should be valid"));

#[derive(Error, Debug)]
pub enum TitlePatternError {
  #[error("Title pattern is missing capture group `{0}`")]
  MissingGroup(&'static str),
}

/// One playable title on a disc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscTitle {
  /// Unique key, passed back to MPV to select this title.
  pub edition: u32,
  /// 1-based position in the duration-sorted list.
  pub display_index: usize,
  /// Sequence number as printed by MPV.
  pub sequence: u32,
  /// Duration as printed, e.g. `1:45:23`.
  pub duration: String,
  pub duration_seconds: u64,
  pub playlist: String,
  /// Set on the longest title only.
  pub is_main: bool,
}

/// Convert `H:MM:SS`-style text to seconds by folding `acc * 60 + unit`.
/// Saturates at `u64::MAX`.
pub fn duration_to_seconds(duration: &str) -> u64 {
  duration
    .split(':')
    .map(|unit| match unit.trim().parse::<u64>() {
      Ok(n) => n,
      Err(e) if *e.kind() == IntErrorKind::PosOverflow => u64::MAX,
      Err(_) => 0,
    })
    .fold(0u64, |acc, unit| acc.saturating_mul(60).saturating_add(unit))
}

/// Which process stream a chunk of output came from. Each stream keeps its
/// own buffer so interleaved reads cannot break a line apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
  Stdout = 0,
  Stderr = 1,
}

/// Accumulates diagnostic text and maintains the deduplicated title list.
#[derive(Debug, Clone)]
pub struct TitleExtractor {
  pattern: Regex,
  logs: [String; 2],
  /// Start of the first line in each log not yet seen complete.
  scanned: [usize; 2],
  titles: Vec<DiscTitle>,
}

impl TitleExtractor {
  pub fn new() -> Self {
    Self {
      pattern: DEFAULT_PATTERN.clone(),
      logs: Default::default(),
      scanned: [0; 2],
      titles: Vec::new(),
    }
  }

  /// Use a custom pattern. It must define the named groups `edition`,
  /// `seq`, `duration` and `playlist`, and match within a single line.
  pub fn with_pattern(pattern: Regex) -> Result<Self, TitlePatternError> {
    for group in GROUPS {
      if !pattern.capture_names().flatten().any(|name| name == group) {
        return Err(TitlePatternError::MissingGroup(group));
      }
    }
    Ok(Self {
      pattern,
      logs: Default::default(),
      scanned: [0; 2],
      titles: Vec::new(),
    })
  }

  /// Append a chunk of process output and rescan the accumulated text.
  ///
  /// Lines already seen complete are skipped; the rescan starts at the
  /// line the previous chunk left unfinished. Returns the full reordered
  /// list when a new title was found.
  pub fn feed(&mut self, stream: OutputStream, chunk: &str) -> Option<Vec<DiscTitle>> {
    let slot = stream as usize;
    if self.logs[slot].len() >= MAX_LOG_BYTES {
      return None;
    }
    self.logs[slot].push_str(chunk);

    let log = std::mem::take(&mut self.logs[slot]);
    let start = self.scanned[slot];
    let published = self.scan(&log[start..]);
    self.scanned[slot] = log[start..].rfind('\n').map_or(start, |i| start + i + 1);
    self.logs[slot] = log;
    published
  }

  /// Match the pattern over `buffer` and merge editions not seen before.
  ///
  /// When anything new was added the list is re-sorted by duration,
  /// longest first, display indexes are reassigned from 1, the first entry
  /// becomes the main title, and the complete list is returned. Otherwise
  /// nothing is published and the previous list stands.
  pub fn scan(&mut self, buffer: &str) -> Option<Vec<DiscTitle>> {
    let mut added = false;

    for caps in self.pattern.captures_iter(buffer) {
      let Some(edition) = caps.name("edition").and_then(|m| m.as_str().parse::<u32>().ok()) else {
        continue;
      };
      if self.titles.iter().any(|t| t.edition == edition) {
        continue;
      }

      let duration = caps.name("duration").map(|m| m.as_str()).unwrap_or_default();
      self.titles.push(DiscTitle {
        edition,
        display_index: 0,
        sequence: caps
          .name("seq")
          .and_then(|m| m.as_str().parse().ok())
          .unwrap_or(0),
        duration: duration.to_string(),
        duration_seconds: 0,
        playlist: caps
          .name("playlist")
          .map(|m| m.as_str().to_string())
          .unwrap_or_default(),
        is_main: false,
      });
      added = true;
    }

    if !added {
      return None;
    }

    for title in &mut self.titles {
      title.duration_seconds = duration_to_seconds(&title.duration);
    }
    self
      .titles
      .sort_by(|a, b| b.duration_seconds.cmp(&a.duration_seconds));
    for (i, title) in self.titles.iter_mut().enumerate() {
      title.display_index = i + 1;
      title.is_main = i == 0;
    }

    log::info!("Disc title list updated: {} titles", self.titles.len());
    Some(self.titles.clone())
  }

  /// Current title list, longest first.
  pub fn titles(&self) -> &[DiscTitle] {
    &self.titles
  }

  /// Drop accumulated output but keep the titles. Used when a new process
  /// starts for the same disc.
  pub fn reset_log(&mut self) {
    self.logs.iter_mut().for_each(String::clear);
    self.scanned = [0; 2];
  }

  /// Drop everything.
  pub fn clear(&mut self) {
    self.reset_log();
    self.titles.clear();
  }
}

impl Default for TitleExtractor {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const OUT: OutputStream = OutputStream::Stdout;

  fn line(edition: u32, idx: u32, duration: &str, playlist: &str) -> String {
    format!(
      "[bd] edition: {} idx: {} duration: {} (playlist: {})\n",
      edition, idx, duration, playlist
    )
  }

  #[test]
  fn test_duration_to_seconds() {
    assert_eq!(duration_to_seconds("1:02:03"), 3723);
    assert_eq!(duration_to_seconds("0:49"), 49);
    assert_eq!(duration_to_seconds("2:00:00"), 7200);
    assert_eq!(duration_to_seconds("15"), 15);
  }

  #[test]
  fn test_oversized_duration_saturates() {
    assert_eq!(duration_to_seconds("400000000000000000:00:00"), u64::MAX);
    assert_eq!(duration_to_seconds("99999999999999999999999"), u64::MAX);
    assert_eq!(duration_to_seconds(&["59"; 20].join(":")), u64::MAX);

    let mut extractor = TitleExtractor::new();
    extractor.feed(OUT, &line(1, 1, "1:00:00", "00001.mpls")).unwrap();
    let titles = extractor
      .feed(OUT, &line(2, 2, "400000000000000000:00:00", "00002.mpls"))
      .expect("second title published");

    assert_eq!(titles.len(), 2);
    assert_eq!(titles[0].edition, 2);
    assert!(titles[0].is_main);
    let indexes: Vec<usize> = titles.iter().map(|t| t.display_index).collect();
    assert_eq!(indexes, vec![1, 2]);
  }

  #[test]
  fn test_titles_sorted_and_indexed() {
    let mut extractor = TitleExtractor::new();
    let text = [
      line(0, 1, "0:12:30", "00010.mpls"),
      line(1, 2, "1:58:07", "00800.mpls"),
      line(2, 3, "0:03:02", "00020.mpls"),
    ]
    .concat();

    let titles = extractor.feed(OUT, &text).expect("titles published");
    let editions: Vec<u32> = titles.iter().map(|t| t.edition).collect();
    assert_eq!(editions, vec![1, 0, 2]);

    let indexes: Vec<usize> = titles.iter().map(|t| t.display_index).collect();
    assert_eq!(indexes, vec![1, 2, 3]);

    assert!(titles.windows(2).all(|w| w[0].duration_seconds > w[1].duration_seconds));
    assert_eq!(titles.iter().filter(|t| t.is_main).count(), 1);
    assert!(titles[0].is_main);
    assert_eq!(titles[0].duration_seconds, 7087);
    assert_eq!(titles[0].playlist, "00800.mpls");
    assert_eq!(titles[0].sequence, 2);
  }

  #[test]
  fn test_duplicate_editions_are_merged() {
    let mut extractor = TitleExtractor::new();
    let first = line(5, 1, "1:00:00", "00001.mpls");

    assert!(extractor.feed(OUT, &first).is_some());
    // The same announcement printed twice
    assert!(extractor.feed(OUT, &first).is_none());
    let titles = extractor.feed(OUT, &line(6, 2, "0:30:00", "00002.mpls")).unwrap();

    assert_eq!(titles.len(), 2);
    assert_eq!(extractor.titles().iter().filter(|t| t.edition == 5).count(), 1);
  }

  #[test]
  fn test_announcement_split_across_reads() {
    let mut extractor = TitleExtractor::new();
    let text = line(3, 1, "1:30:00", "00003.mpls");
    let (head, tail) = text.split_at(text.len() / 2);

    assert!(extractor.feed(OUT, head).is_none());
    let titles = extractor.feed(OUT, tail).expect("completed line is found");
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].edition, 3);
    assert!(titles[0].is_main);
  }

  #[test]
  fn test_rescan_resumes_at_unfinished_line() {
    let mut extractor = TitleExtractor::new();
    let first = line(1, 1, "0:40:00", "00001.mpls");
    let second = line(2, 2, "1:40:00", "00002.mpls");
    let (head, tail) = second.split_at(20);

    extractor.feed(OUT, &first).unwrap();
    assert_eq!(extractor.scanned[0], first.len());

    assert!(extractor.feed(OUT, head).is_none());
    assert_eq!(extractor.scanned[0], first.len());

    let titles = extractor.feed(OUT, tail).unwrap();
    assert_eq!(titles.len(), 2);
    assert_eq!(extractor.scanned[0], first.len() + second.len());

    extractor.reset_log();
    assert_eq!(extractor.scanned, [0, 0]);
  }

  #[test]
  fn test_interleaved_streams_do_not_break_lines() {
    let mut extractor = TitleExtractor::new();
    let text = line(9, 1, "0:58:00", "00009.mpls");
    let (head, tail) = text.split_at(12);

    assert!(extractor.feed(OUT, head).is_none());
    assert!(extractor.feed(OutputStream::Stderr, "[ffmpeg] warning\n").is_none());
    let titles = extractor.feed(OUT, tail).unwrap();
    assert_eq!(titles[0].edition, 9);
  }

  #[test]
  fn test_no_match_keeps_previous_list() {
    let mut extractor = TitleExtractor::new();
    extractor.feed(OUT, &line(1, 1, "0:45:00", "00001.mpls")).unwrap();

    assert!(extractor.feed(OUT, "[cplayer] Playing: movie.mkv\n").is_none());
    assert_eq!(extractor.titles().len(), 1);

    extractor.reset_log();
    assert_eq!(extractor.titles().len(), 1);

    extractor.clear();
    assert!(extractor.titles().is_empty());
  }

  #[test]
  fn test_main_title_moves_when_longer_title_arrives() {
    let mut extractor = TitleExtractor::new();
    extractor.feed(OUT, &line(1, 1, "0:45:00", "00001.mpls")).unwrap();
    let titles = extractor.feed(OUT, &line(2, 2, "2:10:00", "00002.mpls")).unwrap();

    assert_eq!(titles[0].edition, 2);
    assert!(titles[0].is_main);
    assert!(!titles[1].is_main);
    assert_eq!(titles[1].display_index, 2);
  }

  #[test]
  fn test_custom_pattern() {
    let pattern =
      Regex::new(r"title (?P<edition>\d+)/(?P<seq>\d+) (?P<duration>[\d:]+) (?P<playlist>\S+\.mpls)").unwrap();
    let mut extractor = TitleExtractor::with_pattern(pattern).unwrap();
    let titles = extractor.feed(OUT, "title 7/1 1:00:00 00007.mpls\n").unwrap();
    assert_eq!(titles[0].edition, 7);

    let missing = Regex::new(r"title (?P<edition>\d+)").unwrap();
    assert!(matches!(
      TitleExtractor::with_pattern(missing),
      Err(TitlePatternError::MissingGroup("seq"))
    ));
  }

  #[test]
  fn test_output_past_cap_is_ignored() {
    let mut extractor = TitleExtractor::new();
    let filler = "x".repeat(MAX_LOG_BYTES);
    assert!(extractor.feed(OUT, &filler).is_none());
    assert!(extractor.feed(OUT, &line(1, 1, "1:00:00", "00001.mpls")).is_none());
    assert!(extractor.titles().is_empty());
  }
}
