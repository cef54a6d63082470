//! Local Player Adapter
//!
//! The only code allowed to drive the media engine. Engine callbacks are
//! inputs to a small state machine; every transition handler is idempotent
//! because engines repeat and reorder their callbacks.

use tracing::{debug, warn};

use super::engine::{EngineEvent, EngineStatus, LoadRequest, MediaEngine};

/// Lifecycle of the currently loaded track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerPhase {
    /// Waiting for the engine to report duration/position
    Loading,
    Ready,
    Playing,
    Paused,
    /// Natural completion; only a new load leaves this state
    Ended,
    /// Unrecoverable engine error; only a new load leaves this state
    Errored(String),
}

/// What the engine is observed to be doing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalPlayerState {
    pub position_secs: f64,
    pub is_playing: bool,
    pub is_buffering: bool,
    /// 0.0 until known
    pub duration_secs: f64,
    /// Buffered portion of the media, 0.0..=1.0
    pub buffered_fraction: f64,
}

impl LocalPlayerState {
    /// Seconds left until the end, if duration is known
    pub fn remaining_secs(&self) -> Option<f64> {
        (self.duration_secs > 0.0).then(|| (self.duration_secs - self.position_secs).max(0.0))
    }
}

/// Transitions the synchronizer reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterSignal {
    /// First status after a load
    BecameReady,
    /// The engine reported natural completion (may repeat)
    Finished,
    Failed(String),
}

/// Wraps a single media engine instance
#[derive(Debug)]
pub struct PlayerAdapter<E> {
    engine: E,
    phase: PlayerPhase,
    state: LocalPlayerState,
    track_id: Option<String>,
}

impl<E: MediaEngine> PlayerAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            phase: PlayerPhase::Loading,
            state: LocalPlayerState::default(),
            track_id: None,
        }
    }

    pub fn phase(&self) -> &PlayerPhase {
        &self.phase
    }

    pub fn state(&self) -> &LocalPlayerState {
        &self.state
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Whether the engine can take commands right now
    pub fn is_ready(&self) -> bool {
        matches!(
            self.phase,
            PlayerPhase::Ready | PlayerPhase::Playing | PlayerPhase::Paused | PlayerPhase::Ended
        )
    }

    /// Load a track from scratch, re-entering `Loading`
    pub fn load(&mut self, request: LoadRequest) {
        debug!(
            "Loading track {} at {:.2}s (play: {})",
            request.track_id, request.initial_position_secs, request.should_play
        );
        self.phase = PlayerPhase::Loading;
        self.state = LocalPlayerState {
            position_secs: request.initial_position_secs,
            ..LocalPlayerState::default()
        };
        self.track_id = Some(request.track_id.clone());
        self.engine.load(&request);
    }

    /// Feed an engine callback through the state machine
    pub fn handle_event(&mut self, event: EngineEvent) -> Option<AdapterSignal> {
        match event {
            EngineEvent::Status(status) => self.handle_status(status),
            EngineEvent::Failed(message) => {
                if matches!(self.phase, PlayerPhase::Errored(_)) {
                    return None;
                }
                warn!("Player error on track {:?}: {}", self.track_id, message);
                self.phase = PlayerPhase::Errored(message.clone());
                self.state.is_playing = false;
                Some(AdapterSignal::Failed(message))
            }
        }
    }

    fn handle_status(&mut self, status: EngineStatus) -> Option<AdapterSignal> {
        if matches!(self.phase, PlayerPhase::Errored(_)) {
            return None;
        }

        self.state.position_secs = status.position_secs;
        self.state.is_playing = status.is_playing;
        self.state.is_buffering = status.is_buffering;
        if let Some(duration) = status.duration_secs.filter(|d| *d > 0.0) {
            self.state.duration_secs = duration;
        }
        if let Some(playable) = status.playable_secs {
            if self.state.duration_secs > 0.0 {
                self.state.buffered_fraction = (playable / self.state.duration_secs).clamp(0.0, 1.0);
            }
        }

        if self.phase == PlayerPhase::Loading {
            self.phase = PlayerPhase::Ready;
            debug!("Player ready at {:.2}s", status.position_secs);
            return Some(AdapterSignal::BecameReady);
        }

        if status.did_just_finish {
            self.phase = PlayerPhase::Ended;
            return Some(AdapterSignal::Finished);
        }

        if self.phase != PlayerPhase::Ended {
            self.phase = if status.is_playing {
                PlayerPhase::Playing
            } else {
                PlayerPhase::Paused
            };
        }
        None
    }

    /// Seek, clamped into `[0, duration]`. Swallowed before the player is ready.
    pub fn seek_to(&mut self, position_secs: f64) -> bool {
        if !self.is_ready() {
            debug!("Player not ready, dropping seek to {:.2}s", position_secs);
            return false;
        }
        let mut position = position_secs.max(0.0);
        if self.state.duration_secs > 0.0 {
            position = position.min(self.state.duration_secs);
        }
        self.engine.set_position(position);
        true
    }

    /// Start playback. Swallowed before the player is ready.
    pub fn play(&mut self) -> bool {
        if !self.is_ready() {
            debug!("Player not ready, dropping play");
            return false;
        }
        self.engine.play();
        true
    }

    /// Pause playback. Swallowed before the player is ready.
    pub fn pause(&mut self) -> bool {
        if !self.is_ready() {
            debug!("Player not ready, dropping pause");
            return false;
        }
        self.engine.pause();
        true
    }
}
