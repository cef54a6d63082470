//! FFI types exposed via uniffi

use crate::config::SyncConfig;
use crate::player::{EngineEvent, EngineStatus, LoadRequest as InternalLoadRequest};
use crate::sync::{
    CommandOutcome as InternalCommandOutcome, Notice as InternalNotice,
    PlaybackView as InternalPlaybackView, ProtocolError, Role, SkipDirection as InternalSkipDirection,
};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Not in a session")]
    NotInSession,

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Called from a session thread")]
    Reentrant,
}

impl From<ProtocolError> for CoreError {
    fn from(e: ProtocolError) -> Self {
        CoreError::InvalidEvent(e.to_string())
    }
}

/// Member role exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum MemberRole {
    Owner,
    Admin,
    Moderator,
    Member,
}

impl From<Role> for MemberRole {
    fn from(r: Role) -> Self {
        match r {
            Role::Owner => MemberRole::Owner,
            Role::Admin => MemberRole::Admin,
            Role::Moderator => MemberRole::Moderator,
            Role::Member => MemberRole::Member,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SkipDirection {
    Next,
    Previous,
}

impl From<SkipDirection> for InternalSkipDirection {
    fn from(d: SkipDirection) -> Self {
        match d {
            SkipDirection::Next => InternalSkipDirection::Next,
            SkipDirection::Previous => InternalSkipDirection::Previous,
        }
    }
}

/// Result of a transport control
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum CommandOutcome {
    Sent,
    NotPermitted,
    Dropped,
    Unavailable,
}

impl From<InternalCommandOutcome> for CommandOutcome {
    fn from(o: InternalCommandOutcome) -> Self {
        match o {
            InternalCommandOutcome::Sent => CommandOutcome::Sent,
            InternalCommandOutcome::NotPermitted => CommandOutcome::NotPermitted,
            InternalCommandOutcome::Dropped => CommandOutcome::Dropped,
            InternalCommandOutcome::Unavailable => CommandOutcome::Unavailable,
        }
    }
}

/// Track to open in the native player
#[derive(Debug, Clone, uniffi::Record)]
pub struct LoadRequest {
    pub track_id: String,
    pub source_url: Option<String>,
    /// Open here rather than seeking after start
    pub initial_position_secs: f64,
    pub should_play: bool,
    /// How often the player should report status
    pub progress_interval_ms: u64,
}

impl From<&InternalLoadRequest> for LoadRequest {
    fn from(r: &InternalLoadRequest) -> Self {
        Self {
            track_id: r.track_id.clone(),
            source_url: r.source_url.clone(),
            initial_position_secs: r.initial_position_secs,
            should_play: r.should_play,
            progress_interval_ms: r.progress_interval_ms,
        }
    }
}

/// Status callback from the native player
#[derive(Debug, Clone, uniffi::Record)]
pub struct PlayerStatus {
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    pub playable_secs: Option<f64>,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub did_just_finish: bool,
    /// Set when the player failed to load or play
    pub error: Option<String>,
}

impl From<PlayerStatus> for EngineEvent {
    fn from(s: PlayerStatus) -> Self {
        if let Some(message) = s.error {
            return EngineEvent::Failed(message);
        }
        EngineEvent::Status(EngineStatus {
            position_secs: s.position_secs,
            duration_secs: s.duration_secs,
            playable_secs: s.playable_secs,
            is_playing: s.is_playing,
            is_buffering: s.is_buffering,
            did_just_finish: s.did_just_finish,
        })
    }
}

/// What the player controls should show
#[derive(Debug, Clone, uniffi::Record)]
pub struct PlaybackView {
    pub track_id: Option<String>,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub buffered_fraction: f64,
    pub is_playing: bool,
    pub is_loading: bool,
    pub controls_locked: bool,
    pub has_next: bool,
    pub has_previous: bool,
    pub error: Option<String>,
}

impl From<InternalPlaybackView> for PlaybackView {
    fn from(v: InternalPlaybackView) -> Self {
        Self {
            track_id: v.track_id,
            position_secs: v.position_secs,
            duration_secs: v.duration_secs,
            buffered_fraction: v.buffered_fraction,
            is_playing: v.is_playing,
            is_loading: v.is_loading,
            controls_locked: v.controls_locked,
            has_next: v.has_next,
            has_previous: v.has_previous,
            error: v.error,
        }
    }
}

/// Advisory notice for the UI
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum Notice {
    CommandDropped { event: String, reason: String },
    PlaybackFailed { message: String },
    RoleChanged { role: MemberRole },
    RemovedFromRoom { reason: String },
}

impl From<InternalNotice> for Notice {
    fn from(n: InternalNotice) -> Self {
        match n {
            InternalNotice::CommandDropped { command, reason } => Notice::CommandDropped {
                event: command.event_name().to_string(),
                reason,
            },
            InternalNotice::PlaybackFailed(message) => Notice::PlaybackFailed { message },
            InternalNotice::RoleChanged(role) => Notice::RoleChanged { role: role.into() },
            InternalNotice::RemovedFromRoom(reason) => Notice::RemovedFromRoom { reason },
        }
    }
}

/// Sync tuning exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct SyncSettings {
    pub drift_tolerance_secs: f64,
    pub correction_cooldown_ms: u64,
    pub end_of_track_epsilon_secs: f64,
    pub progress_interval_ms: u64,
}

impl From<SyncConfig> for SyncSettings {
    fn from(c: SyncConfig) -> Self {
        Self {
            drift_tolerance_secs: c.drift_tolerance_secs,
            correction_cooldown_ms: c.correction_cooldown_ms,
            end_of_track_epsilon_secs: c.end_of_track_epsilon_secs,
            progress_interval_ms: c.progress_interval_ms,
        }
    }
}

impl From<SyncSettings> for SyncConfig {
    fn from(s: SyncSettings) -> Self {
        Self {
            drift_tolerance_secs: s.drift_tolerance_secs,
            correction_cooldown_ms: s.correction_cooldown_ms,
            end_of_track_epsilon_secs: s.end_of_track_epsilon_secs,
            progress_interval_ms: s.progress_interval_ms,
        }
    }
}

/// Default sync tuning
#[uniffi::export]
pub fn default_sync_settings() -> SyncSettings {
    SyncConfig::default().into()
}

/// Native media player, driven only by the session.
///
/// Every call, including the first `load` made while joining, arrives on a
/// runtime worker thread; hop to the UI thread as needed. `on_player_status`
/// may be called from inside these methods, but the blocking session queries
/// fail with `Reentrant` there.
#[uniffi::export(callback_interface)]
pub trait PlayerEngine: Send + Sync {
    fn load(&self, request: LoadRequest);
    fn set_position(&self, position_secs: f64);
    fn play(&self);
    fn pause(&self);
}

/// Native room socket
#[uniffi::export(callback_interface)]
pub trait RoomTransport: Send + Sync {
    fn is_connected(&self) -> bool;
    /// Emit `event` with a JSON payload
    fn emit(&self, event: String, payload: String);
}

/// Callback interface for session events.
///
/// Called on a dedicated listener thread, so it may query or control the session.
#[uniffi::export(callback_interface)]
pub trait SessionListener: Send + Sync {
    fn on_view_changed(&self, view: PlaybackView);
    fn on_notice(&self, notice: Notice);
    fn on_session_ended(&self, reason: String);
}
