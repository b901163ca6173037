//! Supervises an external MPV process and bridges its JSON IPC to a UI.
//!
//! [`Bridge`] is the entry point: it plays files and disc sources, restarts
//! discs on another title, forwards raw commands, and publishes
//! [`BridgeEvent`]s for playback readiness, property changes, disc title
//! lists and session end.

mod bridge;
mod config;
mod error;
mod events;
pub mod mpv;
mod supervisor;

#[cfg(test)]
mod testing;

pub use bridge::Bridge;
pub use config::{AppConfig, ConfigError};
pub use error::BridgeError;
pub use events::{BridgeEvent, CloseReason, EventBus, EventKind, SubscriptionId};
pub use supervisor::{PlayerState, Supervisor};
