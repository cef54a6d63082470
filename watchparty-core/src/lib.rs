//! Watch Party - Core Library
//!
//! Keeps a local video player in step with a shared room: correcting
//! server snapshots for transit time, reconciling the player against them and
//! gating transport controls by role.

pub mod channel;
pub mod clock;
pub mod config;
pub mod ffi;
pub mod player;
pub mod sync;

// Re-exports for convenience
pub use channel::{ChannelError, CommandChannel};
pub use config::SyncConfig;
pub use player::{MediaEngine, PlayerAdapter};
pub use sync::{InboundEvent, OutboundCommand, PlaybackSnapshot, PlaybackSynchronizer};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
