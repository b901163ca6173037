//! Async IPC connection to MPV.
//!
//! Handles platform-specific socket/pipe connections. Reads are decoded
//! line by line into [`IpcMessage`]s; writes are queued to a writer task.

use std::time::Duration;

use async_channel::{Receiver, Sender};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{IpcMessage, LineDecoder, MpvCommand};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("IPC connection failed after {attempts} attempts: {reason}")]
  ConnectionFailed { attempts: u32, reason: String },
  #[error("Write failed: {0}")]
  WriteFailed(#[from] std::io::Error),
  #[error("Failed to encode command: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("Disconnected")]
  Disconnected,
}

/// MPV IPC connection.
pub struct MpvIpc {
  write_tx: Sender<Vec<u8>>,
  message_rx: Receiver<IpcMessage>,
  shutdown: CancellationToken,
  _reader_handle: JoinHandle<()>,
  _writer_handle: JoinHandle<()>,
}

impl MpvIpc {
  /// Connect to the MPV control endpoint, retrying at a fixed interval
  /// while the player has not opened it yet.
  pub async fn connect(path: &str, attempts: u32, interval: Duration) -> Result<Self, IpcError> {
    let mut last_error = String::from("no attempt made");

    for attempt in 0..attempts {
      if attempt > 0 {
        tokio::time::sleep(interval).await;
      }

      match Self::try_connect(path).await {
        Ok(ipc) => {
          log::info!("MPV IPC connected after {} attempt(s)", attempt + 1);
          return Ok(ipc);
        }
        Err(e) => {
          log::debug!("IPC connect attempt {} failed: {}", attempt + 1, e);
          last_error = e.to_string();
        }
      }
    }

    Err(IpcError::ConnectionFailed {
      attempts,
      reason: last_error,
    })
  }

  #[cfg(windows)]
  async fn try_connect(path: &str) -> std::io::Result<Self> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new().open(path)?;
    let (reader, writer) = tokio::io::split(client);
    Ok(Self::setup(reader, writer))
  }

  #[cfg(not(windows))]
  async fn try_connect(path: &str) -> std::io::Result<Self> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path).await?;
    let (reader, writer) = tokio::io::split(stream);
    Ok(Self::setup(reader, writer))
  }

  fn setup<R, W>(reader: R, writer: W) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    let shutdown = CancellationToken::new();
    let (message_tx, message_rx) = async_channel::unbounded();
    let (write_tx, write_rx) = async_channel::unbounded::<Vec<u8>>();

    let reader_shutdown = shutdown.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, message_tx, reader_shutdown).await;
    });

    let writer_shutdown = shutdown.clone();
    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx, writer_shutdown).await;
    });

    Self {
      write_tx,
      message_rx,
      shutdown,
      _reader_handle: reader_handle,
      _writer_handle: writer_handle,
    }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    message_tx: Sender<IpcMessage>,
    shutdown: CancellationToken,
  ) {
    log::debug!("MPV IPC reader loop started");
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
      let read = tokio::select! {
        _ = shutdown.cancelled() => break,
        read = reader.read(&mut buf) => read,
      };

      match read {
        Ok(0) => {
          log::info!("MPV IPC connection closed");
          break;
        }
        Ok(n) => {
          for message in decoder.feed(&buf[..n]) {
            if message_tx.send(message).await.is_err() {
              return;
            }
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          break;
        }
      }
    }

    // Nothing more will arrive; further writes are pointless
    shutdown.cancel();
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: Receiver<Vec<u8>>,
    shutdown: CancellationToken,
  ) {
    log::debug!("MPV IPC writer loop started");

    loop {
      let data = tokio::select! {
        _ = shutdown.cancelled() => break,
        data = write_rx.recv() => match data {
          Ok(data) => data,
          Err(_) => break,
        },
      };

      if let Err(e) = writer.write_all(&data).await {
        log::error!("MPV IPC write error: {}", e);
        break;
      }
      if let Err(e) = writer.flush().await {
        log::error!("MPV IPC flush error: {}", e);
        break;
      }
    }

    let _ = writer.shutdown().await;
    log::debug!("MPV IPC writer closed");
  }

  /// Queue raw bytes. Returns `false` if the channel has been destroyed.
  pub fn write(&self, bytes: Vec<u8>) -> bool {
    if self.shutdown.is_cancelled() {
      return false;
    }
    self.write_tx.try_send(bytes).is_ok()
  }

  /// Encode and queue a command.
  pub fn send(&self, cmd: &MpvCommand) -> Result<(), IpcError> {
    let bytes = cmd.encode()?;
    log::debug!("Sending MPV command: {:?}", cmd.command);
    if self.write(bytes) {
      Ok(())
    } else {
      Err(IpcError::Disconnected)
    }
  }

  /// Decoded inbound messages, in arrival order.
  pub fn messages(&self) -> Receiver<IpcMessage> {
    self.message_rx.clone()
  }

  /// Tear the connection down. Idempotent.
  pub fn destroy(&self) {
    self.shutdown.cancel();
    self.write_tx.close();
  }

  pub fn is_destroyed(&self) -> bool {
    self.shutdown.is_cancelled()
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.destroy();
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use serde_json::json;
  use tokio::io::{AsyncBufReadExt, BufReader};
  use tokio::net::UnixListener;

  #[tokio::test]
  async fn test_connect_gives_up_after_bound() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nobody.sock");

    let started = std::time::Instant::now();
    let result = MpvIpc::connect(path.to_str().unwrap(), 5, Duration::from_millis(10)).await;

    match result {
      Err(IpcError::ConnectionFailed { attempts, .. }) => assert_eq!(attempts, 5),
      _ => panic!("Expected connection failure"),
    }
    // Four waits between five attempts
    assert!(started.elapsed() >= Duration::from_millis(40));
  }

  #[tokio::test]
  async fn test_round_trip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let (read, mut write) = stream.into_split();
      let mut lines = BufReader::new(read).lines();
      let received = lines.next_line().await.unwrap().unwrap();

      // One message split over two writes, then a second one
      write.write_all(b"{\"event\":\"property-change\",\"name\":\"pau").await.unwrap();
      write.flush().await.unwrap();
      tokio::time::sleep(Duration::from_millis(20)).await;
      write
        .write_all(b"se\",\"data\":true}\n{\"event\":\"file-loaded\"}\n")
        .await
        .unwrap();
      write.flush().await.unwrap();
      received
    });

    let ipc = MpvIpc::connect(path.to_str().unwrap(), 10, Duration::from_millis(10))
      .await
      .unwrap();
    ipc
      .send(&MpvCommand::new(vec!["cycle".into(), "pause".into()]))
      .unwrap();

    let received = server.await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&received).unwrap();
    assert_eq!(value, json!({"command": ["cycle", "pause"]}));

    let messages = ipc.messages();
    assert_eq!(
      messages.recv().await.unwrap(),
      IpcMessage::PropertyChange {
        name: "pause".into(),
        data: json!(true)
      }
    );
    assert!(matches!(messages.recv().await.unwrap(), IpcMessage::Lifecycle(_)));
  }

  #[tokio::test]
  async fn test_write_after_destroy_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });

    let ipc = MpvIpc::connect(path.to_str().unwrap(), 10, Duration::from_millis(10))
      .await
      .unwrap();
    let _server_side = accept.await.unwrap().unwrap();

    assert!(ipc.write(b"{\"command\":[\"stop\"]}\n".to_vec()));
    ipc.destroy();
    assert!(ipc.is_destroyed());
    assert!(!ipc.write(b"{\"command\":[\"stop\"]}\n".to_vec()));
    assert!(matches!(ipc.send(&MpvCommand::quit()), Err(IpcError::Disconnected)));
  }
}
