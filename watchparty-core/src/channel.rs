//! Outbound room channel

use thiserror::Error;

use crate::sync::OutboundCommand;

/// Errors sending a command upstream
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Room channel is not connected")]
    NotConnected,

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fire-and-forget command transport to the room server.
///
/// Implementations must fail fast when disconnected instead of queueing:
/// a transport intent delivered late is worse than one never delivered.
pub trait CommandChannel {
    fn send(&mut self, room_code: &str, command: &OutboundCommand) -> Result<(), ChannelError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Channel double that records sent commands
    #[derive(Debug)]
    pub(crate) struct RecordingChannel {
        pub connected: bool,
        pub sent: Vec<OutboundCommand>,
    }

    impl Default for RecordingChannel {
        fn default() -> Self {
            Self {
                connected: true,
                sent: Vec::new(),
            }
        }
    }

    impl CommandChannel for RecordingChannel {
        fn send(&mut self, _room_code: &str, command: &OutboundCommand) -> Result<(), ChannelError> {
            if !self.connected {
                return Err(ChannelError::NotConnected);
            }
            self.sent.push(*command);
            Ok(())
        }
    }
}
