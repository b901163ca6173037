//! MPV IPC module - spawns and controls the external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, endpoint naming and the launch seam
//! - `args.rs` - Source classification and command line construction
//! - `ipc.rs` - Async IPC connection (Named Pipes on Windows, Unix Sockets on Linux/macOS)
//! - `protocol.rs` - JSON command/message types and line decoding
//! - `observer.rs` - Property observation
//! - `titles.rs` - Disc title extraction from diagnostic output

mod args;
mod ipc;
mod observer;
mod process;
mod protocol;
mod titles;

pub use args::{build_args, CacheTier, DiscMode, LaunchSpec, MediaSource};
pub use ipc::{IpcError, MpvIpc};
pub use observer::{PropertyKey, PropertyObserver, OBSERVED_PROPERTIES};
pub use process::{cleanup_ipc, find_mpv, ipc_path, unique_ipc_path, Launcher, MpvLauncher, ProcessError};
pub use protocol::{decode, next_request_id, IpcMessage, LifecycleEvent, LineDecoder, MpvCommand};
pub use titles::{
  duration_to_seconds, DiscTitle, OutputStream, TitleExtractor, TitlePatternError, DEFAULT_TITLE_PATTERN,
};
