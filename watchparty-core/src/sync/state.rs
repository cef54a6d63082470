//! Sync Session State

use std::fmt;

use crate::clock::CorrectedTarget;

use super::protocol::{
    PlayState, PlaybackSnapshot, PlaylistAction, PlaylistUpdate, QueueItem, Role, RoomMember,
    SkipDirection,
};

/// Identifies one join of a shared playback context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn random() -> Self {
        SessionId(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Re-entrancy guard held while a corrective seek settles.
///
/// Released by time rather than by a seek-completed signal, since not every
/// engine reports one.
#[derive(Debug, Clone, Default)]
pub struct CorrectionGuard {
    engaged_until_ms: Option<u64>,
}

impl CorrectionGuard {
    pub fn engage(&mut self, now_ms: u64, cooldown_ms: u64) {
        self.engaged_until_ms = Some(now_ms.saturating_add(cooldown_ms));
    }

    pub fn is_engaged(&self, now_ms: u64) -> bool {
        self.engaged_until_ms.is_some_and(|until| now_ms < until)
    }

    /// When the guard releases, if it is (or was) engaged
    pub fn deadline_ms(&self) -> Option<u64> {
        self.engaged_until_ms
    }

    pub fn release(&mut self) {
        self.engaged_until_ms = None;
    }
}

/// Shared queue, kept sorted by position
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    items: Vec<QueueItem>,
}

impl PlayQueue {
    pub fn new(mut items: Vec<QueueItem>) -> Self {
        items.sort_by_key(|item| item.position);
        Self { items }
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Apply an add/remove/reorder update
    pub fn apply(&mut self, update: PlaylistUpdate) {
        match update.action {
            PlaylistAction::Add => {
                if self.get(&update.item.id).is_none() {
                    self.items.push(update.item);
                }
            }
            PlaylistAction::Remove => {
                self.items.retain(|item| item.id != update.item.id);
            }
            PlaylistAction::Reorder => {
                if let Some(existing) = self.items.iter_mut().find(|item| item.id == update.item.id) {
                    *existing = update.item;
                }
            }
        }
        self.items.sort_by_key(|item| item.position);
    }

    /// Whether an item exists after/before `current_id` in queue order
    pub fn has_neighbour(&self, current_id: &str, direction: SkipDirection) -> bool {
        let Some(current) = self.get(current_id) else {
            return false;
        };
        self.items.iter().any(|item| match direction {
            SkipDirection::Next => item.position > current.position,
            SkipDirection::Previous => item.position < current.position,
        })
    }
}

/// Per-join synchronisation state.
///
/// Created when we join a shared playback context and dropped when we leave;
/// never shared between contexts and never persisted.
#[derive(Debug)]
pub struct SyncSession {
    pub id: SessionId,
    pub room_code: String,
    pub local_user_id: String,
    /// Our role, `None` until the member list names us
    pub role: Option<Role>,
    /// Latest authoritative snapshot
    pub snapshot: Option<PlaybackSnapshot>,
    /// Target computed on the latest reconciliation pass
    pub target: Option<CorrectedTarget>,
    /// Track currently loaded into the player
    pub active_track_id: Option<String>,
    pub guard: CorrectionGuard,
    /// Set once end of track has been reported upstream for the active track
    pub has_completed_once: bool,
    /// What the server most recently asked for; engine callbacks never change it
    pub intended_play_state: PlayState,
    /// A snapshot arrived while the guard was engaged and still needs applying
    pub resync_pending: bool,
    pub queue: PlayQueue,
}

impl SyncSession {
    pub fn new(id: SessionId, room_code: String, local_user_id: String) -> Self {
        Self {
            id,
            room_code,
            local_user_id,
            role: None,
            snapshot: None,
            target: None,
            active_track_id: None,
            guard: CorrectionGuard::default(),
            has_completed_once: false,
            intended_play_state: PlayState::Paused,
            resync_pending: false,
            queue: PlayQueue::default(),
        }
    }

    /// Effective role; unknown counts as a plain member
    pub fn effective_role(&self) -> Role {
        self.role.unwrap_or(Role::Member)
    }

    pub fn can_control(&self) -> bool {
        self.effective_role().can_control()
    }

    /// Pick our role out of the member list
    pub fn update_role_from_members(&mut self, members: &[RoomMember]) {
        self.role = members
            .iter()
            .find(|m| m.user.id() == self.local_user_id)
            .map(|m| m.role);
    }

    /// Record a new snapshot. Returns true when it switches to a different track.
    ///
    /// A snapshot without a track leaves the intended play state alone.
    pub fn accept_snapshot(&mut self, snapshot: PlaybackSnapshot) -> bool {
        let track_changed = match snapshot.track_id {
            Some(_) => {
                self.intended_play_state = snapshot.play_state;
                snapshot.track_id != self.active_track_id
            }
            None => false,
        };
        self.snapshot = Some(snapshot);
        track_changed
    }

    /// Forget the current snapshot; nothing is synced until the next one
    pub fn clear_snapshot(&mut self) {
        self.snapshot = None;
        self.target = None;
        self.resync_pending = false;
    }

    /// Hard cutover to a new track
    pub fn begin_track(&mut self, track_id: String) {
        self.active_track_id = Some(track_id);
        self.has_completed_once = false;
        self.guard.release();
        self.resync_pending = false;
        self.target = None;
    }

    pub fn has_neighbour(&self, direction: SkipDirection) -> bool {
        self.active_track_id
            .as_deref()
            .is_some_and(|id| self.queue.has_neighbour(id, direction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MemberUser;

    fn item(id: &str, position: i64) -> QueueItem {
        QueueItem {
            id: id.to_string(),
            position,
            video: None,
        }
    }

    fn snapshot(track: Option<&str>, play_state: PlayState) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_id: track.map(str::to_string),
            play_state,
            position_secs: 0.0,
            issued_at_ms: 0,
        }
    }

    #[test]
    fn test_guard_releases_after_cooldown() {
        let mut guard = CorrectionGuard::default();
        assert!(!guard.is_engaged(0));

        guard.engage(1000, 100);
        assert!(guard.is_engaged(1000));
        assert!(guard.is_engaged(1099));
        assert!(!guard.is_engaged(1100));

        guard.engage(2000, 100);
        guard.release();
        assert!(!guard.is_engaged(2000));
        assert_eq!(guard.deadline_ms(), None);
    }

    #[test]
    fn test_queue_updates() {
        let mut queue = PlayQueue::new(vec![item("b", 2), item("a", 1)]);
        assert_eq!(queue.items()[0].id, "a");

        // Duplicate adds are ignored
        queue.apply(PlaylistUpdate { item: item("a", 9), action: PlaylistAction::Add });
        assert_eq!(queue.items().len(), 2);

        queue.apply(PlaylistUpdate { item: item("c", 0), action: PlaylistAction::Add });
        assert_eq!(queue.items()[0].id, "c");

        queue.apply(PlaylistUpdate { item: item("c", 5), action: PlaylistAction::Reorder });
        assert_eq!(queue.items()[2].id, "c");

        queue.apply(PlaylistUpdate { item: item("a", 1), action: PlaylistAction::Remove });
        let ids: Vec<&str> = queue.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn test_queue_neighbours() {
        let queue = PlayQueue::new(vec![item("a", 1), item("b", 2), item("c", 3)]);
        assert!(queue.has_neighbour("a", SkipDirection::Next));
        assert!(!queue.has_neighbour("a", SkipDirection::Previous));
        assert!(queue.has_neighbour("c", SkipDirection::Previous));
        assert!(!queue.has_neighbour("c", SkipDirection::Next));
        assert!(!queue.has_neighbour("missing", SkipDirection::Next));
    }

    #[test]
    fn test_role_from_members() {
        let mut session = SyncSession::new(SessionId(1), "ROOM".to_string(), "u2".to_string());
        assert_eq!(session.effective_role(), Role::Member);

        session.update_role_from_members(&[
            RoomMember { user: MemberUser::Id("u1".to_string()), role: Role::Owner },
            RoomMember { user: MemberUser::Id("u2".to_string()), role: Role::Moderator },
        ]);
        assert_eq!(session.role, Some(Role::Moderator));
        assert!(session.can_control());

        session.update_role_from_members(&[]);
        assert_eq!(session.role, None);
        assert!(!session.can_control());
    }

    #[test]
    fn test_accept_snapshot_detects_track_change() {
        let mut session = SyncSession::new(SessionId(1), "ROOM".to_string(), "u1".to_string());
        assert!(session.accept_snapshot(snapshot(Some("t1"), PlayState::Playing)));
        assert_eq!(session.intended_play_state, PlayState::Playing);

        session.begin_track("t1".to_string());
        assert!(!session.accept_snapshot(snapshot(Some("t1"), PlayState::Paused)));
        assert_eq!(session.intended_play_state, PlayState::Paused);

        // Nothing playing is not a track change, and says nothing about play state
        assert!(!session.accept_snapshot(snapshot(None, PlayState::Playing)));
        assert_eq!(session.intended_play_state, PlayState::Paused);
        assert!(session.accept_snapshot(snapshot(Some("t2"), PlayState::Playing)));
    }

    #[test]
    fn test_begin_track_resets_completion() {
        let mut session = SyncSession::new(SessionId(1), "ROOM".to_string(), "u1".to_string());
        session.has_completed_once = true;
        session.guard.engage(0, 100);
        session.resync_pending = true;

        session.begin_track("t2".to_string());
        assert!(!session.has_completed_once);
        assert!(!session.guard.is_engaged(0));
        assert!(!session.resync_pending);
        assert_eq!(session.active_track_id.as_deref(), Some("t2"));
    }

    #[test]
    fn test_clear_snapshot() {
        let mut session = SyncSession::new(SessionId(1), "ROOM".to_string(), "u1".to_string());
        session.accept_snapshot(snapshot(Some("t1"), PlayState::Playing));
        session.resync_pending = true;

        session.clear_snapshot();
        assert!(session.snapshot.is_none());
        assert!(!session.resync_pending);
        // The loaded track stays; only the sync source is gone
        assert_eq!(session.intended_play_state, PlayState::Playing);
    }
}
