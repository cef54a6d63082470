//! Playback Sync
//!
//! Wire protocol, per-session state and the reconciliation loop that keeps
//! the local player in step with the room.

mod protocol;
mod reconciler;
mod state;

pub use protocol::*;
pub use reconciler::*;
pub use state::*;
