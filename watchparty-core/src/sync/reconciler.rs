//! Playback Reconciliation
//!
//! Keeps the local player within tolerance of the server's playback state.
//! Two triggers feed the same pass: engine progress ticks (passive drift
//! check) and incoming snapshots (active resync). User transport controls go
//! through the role gate here and never touch the player directly; the
//! server's re-broadcast is what moves everyone, the originator included.

use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::clock::{self, CorrectedTarget};
use crate::config::SyncConfig;
use crate::player::{AdapterSignal, EngineEvent, LoadRequest, MediaEngine, PlayerAdapter, PlayerPhase};

use super::protocol::{
    InboundEvent, JoinedSession, OutboundCommand, PlayState, PlaybackSnapshot, Role, SkipDirection,
};
use super::state::{PlayQueue, SessionId, SyncSession};

/// Advisory notices for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A command could not be sent and was discarded
    CommandDropped { command: OutboundCommand, reason: String },
    /// The engine gave up on the current track; a manual reload may help
    PlaybackFailed(String),
    /// Our role in the room changed
    RoleChanged(Role),
    /// We were removed from the room; the session is over
    RemovedFromRoom(String),
}

/// Result of a user transport command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent,
    /// Our role may not issue transport commands
    NotPermitted,
    /// The channel is down; the command was discarded
    Dropped,
    /// Nothing to skip to in that direction
    Unavailable,
}

/// Whether the session survives an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Ended,
}

/// What woke the reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Ready,
    Tick,
    Snapshot,
    Timer,
}

/// Read model for the player controls
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackView {
    pub track_id: Option<String>,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub buffered_fraction: f64,
    pub is_playing: bool,
    pub is_loading: bool,
    /// Transport controls disabled for our role
    pub controls_locked: bool,
    pub has_next: bool,
    pub has_previous: bool,
    pub error: Option<String>,
}

/// Client side of a shared playback session
#[derive(Debug)]
pub struct PlaybackSynchronizer<E, C> {
    session: SyncSession,
    player: PlayerAdapter<E>,
    channel: C,
    config: SyncConfig,
    notices: Vec<Notice>,
}

impl<E: MediaEngine, C: CommandChannel> PlaybackSynchronizer<E, C> {
    /// Join a shared playback context.
    ///
    /// Opens the current track on `engine` straight away when the room has one.
    pub fn join(
        session_id: SessionId,
        room_code: String,
        local_user_id: String,
        joined: JoinedSession,
        engine: E,
        channel: C,
        config: SyncConfig,
        now_ms: u64,
    ) -> Self {
        let mut sync = Self {
            session: SyncSession::new(session_id, room_code, local_user_id),
            player: PlayerAdapter::new(engine),
            channel,
            config,
            notices: Vec::new(),
        };

        info!(
            "Joined room {} (session {})",
            sync.session.room_code, sync.session.id
        );
        sync.bootstrap(joined, now_ms);
        sync
    }

    /// Tear down the session and hand back the engine and channel.
    /// Late engine callbacks for it are ignored by id.
    pub fn leave(self) -> (E, C) {
        info!(
            "Left room {} (session {})",
            self.session.room_code, self.session.id
        );
        (self.player.into_engine(), self.channel)
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn player(&self) -> &PlayerAdapter<E> {
        &self.player
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Take the notices raised since the last call
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn bootstrap(&mut self, joined: JoinedSession, now_ms: u64) {
        self.session.update_role_from_members(&joined.members);
        self.session.queue = PlayQueue::new(joined.playlist_items);
        debug!(
            "Role: {:?}, queue: {} items",
            self.session.role,
            self.session.queue.items().len()
        );

        match joined.current_state {
            Some(snapshot) => self.apply_snapshot(snapshot, now_ms),
            None => {
                debug!("Room has no playback state");
                self.session.clear_snapshot();
            }
        }
    }

    /// Handle an event from the room channel
    pub fn handle_event(&mut self, event: InboundEvent, now_ms: u64) -> SessionFlow {
        match event {
            InboundEvent::JoinedSession(joined) => {
                // Re-delivered after a reconnect; state is self-contained so just rebuild
                let previous_role = self.session.effective_role();
                self.bootstrap(joined, now_ms);
                let role = self.session.effective_role();
                if role != previous_role {
                    info!("Role changed to {:?} on rejoin", role);
                    self.notices.push(Notice::RoleChanged(role));
                }
            }
            InboundEvent::StateChanged(snapshot)
            | InboundEvent::Seeked(snapshot)
            | InboundEvent::TrackChanged(snapshot)
            | InboundEvent::VideoChanged(snapshot) => {
                self.apply_snapshot(snapshot, now_ms);
            }
            InboundEvent::PlaylistUpdated(update) => {
                debug!("Queue {:?}: {}", update.action, update.item.id);
                self.session.queue.apply(update);
            }
            InboundEvent::UserRoleChanged(change) => {
                if change.user_id == self.session.local_user_id {
                    info!("Role changed to {:?}", change.new_role);
                    self.session.role = Some(change.new_role);
                    self.notices.push(Notice::RoleChanged(change.new_role));
                }
            }
            InboundEvent::UserKicked(kicked) => {
                if kicked.user_id == self.session.local_user_id {
                    warn!("Kicked from room {}: {}", self.session.room_code, kicked.reason);
                    self.notices.push(Notice::RemovedFromRoom(kicked.reason));
                    return SessionFlow::Ended;
                }
            }
            InboundEvent::ForceDisconnect(disconnect) => {
                warn!("Disconnected from room {}: {}", self.session.room_code, disconnect.reason);
                self.notices.push(Notice::RemovedFromRoom(disconnect.reason));
                return SessionFlow::Ended;
            }
        }
        SessionFlow::Continue
    }

    /// Handle a callback from the media engine
    pub fn handle_engine_event(&mut self, session_id: SessionId, event: EngineEvent, now_ms: u64) {
        if session_id != self.session.id {
            debug!("Ignoring engine callback for stale session {}", session_id);
            return;
        }

        match self.player.handle_event(event) {
            Some(AdapterSignal::BecameReady) => self.reconcile(now_ms, Trigger::Ready),
            Some(AdapterSignal::Finished) => self.on_finished(now_ms),
            Some(AdapterSignal::Failed(message)) => {
                self.notices.push(Notice::PlaybackFailed(message));
            }
            None => {
                if !matches!(self.player.phase(), PlayerPhase::Errored(_)) {
                    self.reconcile(now_ms, Trigger::Tick);
                }
            }
        }
    }

    /// Re-run a pass deferred by the correction guard, once the guard releases
    pub fn poll_timer(&mut self, now_ms: u64) {
        if self.session.resync_pending && !self.session.guard.is_engaged(now_ms) {
            self.reconcile(now_ms, Trigger::Timer);
        }
    }

    /// When `poll_timer` next has work to do
    pub fn next_wakeup_ms(&self) -> Option<u64> {
        if self.session.resync_pending {
            self.session.guard.deadline_ms()
        } else {
            None
        }
    }

    /// Reload the active track from scratch (after a playback error)
    pub fn reload(&mut self, now_ms: u64) -> bool {
        let Some(track_id) = self.session.active_track_id.clone() else {
            return false;
        };
        info!("Reloading track {}", track_id);
        self.load_track(track_id, now_ms);
        true
    }

    fn apply_snapshot(&mut self, snapshot: PlaybackSnapshot, now_ms: u64) {
        let track_changed = self.session.accept_snapshot(snapshot);

        let Some(track_id) = self
            .session
            .snapshot
            .as_ref()
            .and_then(|s| s.track_id.clone())
        else {
            debug!("Snapshot has no active track, nothing to sync");
            return;
        };

        if track_changed {
            info!(
                "Track changed {:?} -> {}",
                self.session.active_track_id, track_id
            );
            self.session.begin_track(track_id.clone());
            self.load_track(track_id, now_ms);
            return;
        }

        self.reconcile(now_ms, Trigger::Snapshot);
    }

    /// Corrected target for the active track, if the latest snapshot is about it
    fn current_target(&self, now_ms: u64) -> Option<CorrectedTarget> {
        let snapshot = self.session.snapshot.as_ref()?;
        if snapshot.track_id.is_none() || snapshot.track_id != self.session.active_track_id {
            return None;
        }
        Some(clock::correct(snapshot, now_ms))
    }

    /// Load the track, opening at the corrected target instead of seeking after start
    fn load_track(&mut self, track_id: String, now_ms: u64) {
        let Some(target) = self.current_target(now_ms) else {
            return;
        };
        self.session.target = Some(target);

        let initial_position_secs = if target.position_secs > self.config.drift_tolerance_secs {
            target.position_secs
        } else {
            0.0
        };
        let source_url = self
            .session
            .queue
            .get(&track_id)
            .and_then(|item| item.source_url())
            .map(str::to_string);

        self.player.load(LoadRequest {
            track_id,
            source_url,
            initial_position_secs,
            should_play: target.is_playing(),
            progress_interval_ms: self.config.progress_interval_ms,
        });
    }

    fn reconcile(&mut self, now_ms: u64, trigger: Trigger) {
        let Some(target) = self.current_target(now_ms) else {
            return;
        };
        if self.session.active_track_id.as_deref() != self.player.track_id() {
            return;
        }
        if !self.player.is_ready() {
            // The ready transition re-applies whatever is current by then
            return;
        }
        if self.session.guard.is_engaged(now_ms) {
            if trigger == Trigger::Snapshot {
                self.session.resync_pending = true;
            }
            return;
        }

        self.session.resync_pending = false;
        self.session.target = Some(target);

        let observed = self.player.state().clone();
        let mut target_position = target.position_secs;
        if observed.duration_secs > 0.0 {
            target_position = target_position.min(observed.duration_secs);
        }

        if *self.player.phase() == PlayerPhase::Ended
            && observed.duration_secs > 0.0
            && target_position >= observed.duration_secs - self.config.end_of_track_epsilon_secs
        {
            // Both at the end; wait for the server to move on
            return;
        }

        let drift = (observed.position_secs - target_position).abs();
        debug!(
            "Sync ({:?}): drift {:.3}s (target: {:.3}s, actual: {:.3}s)",
            trigger, drift, target_position, observed.position_secs
        );

        if drift > self.config.drift_tolerance_secs {
            info!(
                "Drift {:.2}s exceeds tolerance, seeking to {:.2}s ({:?})",
                drift, target_position, trigger
            );
            if self.player.seek_to(target_position) {
                self.session
                    .guard
                    .engage(now_ms, self.config.correction_cooldown_ms);
            }
        }

        match self.session.intended_play_state {
            PlayState::Playing if !observed.is_playing => {
                debug!("Room is playing but we're not, resuming");
                self.player.play();
            }
            PlayState::Paused if observed.is_playing => {
                debug!("Room is paused but we're playing, pausing");
                self.player.pause();
            }
            _ => {}
        }
    }

    fn on_finished(&mut self, now_ms: u64) {
        if self.session.guard.is_engaged(now_ms) {
            debug!("Ignoring finish while a correction is in flight");
            return;
        }
        if self.session.has_completed_once {
            debug!("Ignoring duplicate finish");
            return;
        }
        let remaining = self.player.state().remaining_secs().unwrap_or(0.0);
        if remaining > self.config.end_of_track_epsilon_secs {
            debug!("Ignoring finish with {:.2}s remaining", remaining);
            return;
        }

        self.session.has_completed_once = true;
        info!("Track {:?} finished, requesting next", self.session.active_track_id);
        self.send(OutboundCommand::RequestAdvanceTrack {
            direction: SkipDirection::Next,
        });
    }

    fn send(&mut self, command: OutboundCommand) -> CommandOutcome {
        match self.channel.send(&self.session.room_code, &command) {
            Ok(()) => {
                debug!("Sent {}", command.event_name());
                CommandOutcome::Sent
            }
            Err(e) => {
                warn!("Dropping {}: {}", command.event_name(), e);
                self.notices.push(Notice::CommandDropped {
                    command,
                    reason: e.to_string(),
                });
                CommandOutcome::Dropped
            }
        }
    }

    fn check_control(&self, what: &str) -> bool {
        if self.session.can_control() {
            return true;
        }
        debug!("Role {:?} may not {}", self.session.effective_role(), what);
        false
    }

    /// Ask the room to flip play/pause at our current position
    pub fn toggle_play_pause(&mut self) -> CommandOutcome {
        if !self.check_control("toggle playback") {
            return CommandOutcome::NotPermitted;
        }
        let is_playing = self.session.intended_play_state != PlayState::Playing;
        let position_secs = self.player.state().position_secs;
        self.send(OutboundCommand::RequestPlayPause {
            is_playing,
            position_secs,
        })
    }

    /// Ask the room to seek
    pub fn request_seek(&mut self, position_secs: f64) -> CommandOutcome {
        if !self.check_control("seek") {
            return CommandOutcome::NotPermitted;
        }
        let duration = self.player.state().duration_secs;
        let mut position_secs = position_secs.max(0.0);
        if duration > 0.0 {
            position_secs = position_secs.min(duration);
        }
        self.send(OutboundCommand::RequestSeek { position_secs })
    }

    /// Ask the room to move through the queue
    pub fn request_skip(&mut self, direction: SkipDirection) -> CommandOutcome {
        if !self.check_control("skip") {
            return CommandOutcome::NotPermitted;
        }
        if !self.session.has_neighbour(direction) {
            debug!("No queue item in direction {:?}", direction);
            return CommandOutcome::Unavailable;
        }
        self.send(OutboundCommand::RequestAdvanceTrack { direction })
    }

    /// Snapshot of what the controls should show
    pub fn view(&self, now_ms: u64) -> PlaybackView {
        let observed = self.player.state();
        let phase = self.player.phase();

        // The engine lags behind a correction in flight; show where it is heading
        let position_secs = match self.session.target {
            Some(target) if self.session.guard.is_engaged(now_ms) => target.position_secs,
            _ => observed.position_secs,
        };

        PlaybackView {
            track_id: self.session.active_track_id.clone(),
            position_secs,
            duration_secs: observed.duration_secs,
            buffered_fraction: observed.buffered_fraction,
            is_playing: self.session.intended_play_state == PlayState::Playing,
            is_loading: *phase == PlayerPhase::Loading
                || (observed.is_buffering && observed.position_secs == 0.0),
            controls_locked: !self.session.can_control(),
            has_next: self.session.has_neighbour(SkipDirection::Next),
            has_previous: self.session.has_neighbour(SkipDirection::Previous),
            error: match phase {
                PlayerPhase::Errored(message) => Some(message.clone()),
                _ => None,
            },
        }
    }
}
