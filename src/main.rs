//! Headless host for the MPV bridge.
//!
//! Prints bridge events as JSON lines on stdout and reads commands from
//! stdin, one per line:
//!
//! - `["cycle", "pause"]`: any JSON array is sent to MPV unchanged
//! - `play <path>`, `stop`, `switch <edition>`
//! - `titles`, `state`, `get <property>`
//! - `quit`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use discplay::{AppConfig, Bridge, BridgeEvent};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
  /// Media file, disc image, or disc folder to play on startup.
  path: Option<PathBuf>,

  /// Config file (defaults to the per-user config location).
  #[arg(long)]
  config: Option<PathBuf>,

  /// Native window handle to embed the video into.
  #[arg(long)]
  wid: Option<i64>,

  /// MPV executable, overriding the config.
  #[arg(long)]
  mpv: Option<String>,
}

enum Flow {
  Continue,
  Quit,
}

fn emit(value: &impl serde::Serialize) {
  match serde_json::to_string(value) {
    Ok(line) => println!("{}", line),
    Err(e) => log::error!("Failed to encode output: {}", e),
  }
}

async fn handle_line(bridge: &Bridge, line: &str) -> Result<Flow> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(Flow::Continue);
  }

  if line.starts_with('[') {
    let args: Vec<Value> = serde_json::from_str(line).context("command must be a JSON array")?;
    bridge.send_command(args)?;
    return Ok(Flow::Continue);
  }

  let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
  let rest = rest.trim();
  match verb {
    "play" if !rest.is_empty() => bridge.play(&PathBuf::from(rest)).await?,
    "stop" => bridge.stop().await,
    "switch" => {
      let edition: u32 = rest.parse().context("usage: switch <edition>")?;
      bridge.switch_title(edition).await?;
    }
    "titles" => emit(&json!({ "reply": "titles", "titles": bridge.titles() })),
    "state" => emit(&json!({ "reply": "state", "state": bridge.state(), "connected": bridge.is_connected() })),
    "get" if !rest.is_empty() => {
      let request_id = bridge.request_property(rest)?;
      let cached = bridge.property(rest);
      emit(&json!({ "reply": "get", "property": rest, "requestId": request_id, "last": cached }));
    }
    "quit" => return Ok(Flow::Quit),
    _ => bail!("unknown command: {}", line),
  }
  Ok(Flow::Continue)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    .target(env_logger::Target::Stderr)
    .init();

  let args = Args::parse();

  let mut config = match &args.config {
    Some(path) => AppConfig::load_from(path),
    None => AppConfig::load(),
  }
  .context("load config")?;
  if let Some(mpv) = args.mpv {
    config.mpv_path = Some(mpv);
  }
  config.validate().map_err(anyhow::Error::msg)?;

  let bridge = Bridge::new(config);
  bridge.set_window_handle(args.wid);

  let (_, events) = bridge.listen();
  tokio::spawn(async move {
    while let Ok(event) = events.recv().await {
      emit(&event);
    }
  });

  if let Some(path) = &args.path {
    bridge
      .play(path)
      .await
      .with_context(|| format!("play {}", path.display()))?;
  }

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut confirm_pending = false;

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        // Second Ctrl-C confirms
        if confirm_pending || bridge.request_close() {
          break;
        }
        confirm_pending = true;
      }
      line = lines.next_line() => {
        let Some(line) = line.context("read stdin")? else {
          break;
        };
        match handle_line(&bridge, &line).await {
          Ok(Flow::Quit) => break,
          Ok(Flow::Continue) => {}
          Err(e) => {
            log::warn!("{:#}", e);
            emit(&BridgeEvent::Error { message: format!("{:#}", e) });
          }
        }
      }
    }
  }

  bridge.shutdown().await;
  Ok(())
}
