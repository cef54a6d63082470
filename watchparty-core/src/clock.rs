//! Clock correction for server-issued playback snapshots
//!
//! A snapshot describes where playback was when the server produced it.
//! By the time it reaches us it is already stale by the network and
//! processing latency, so a playing snapshot is projected forward to "now".

use crate::sync::{PlayState, PlaybackSnapshot};

/// Where local playback should be right now, derived from a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectedTarget {
    /// Target position in seconds (not clamped against duration)
    pub position_secs: f64,
    /// Target play state
    pub play_state: PlayState,
}

impl CorrectedTarget {
    pub fn is_playing(&self) -> bool {
        self.play_state == PlayState::Playing
    }
}

/// Project a snapshot forward to `now_ms`.
///
/// Paused snapshots pass through unchanged. Playing snapshots advance by the
/// time elapsed since `issued_at_ms`, floored at zero so a timestamp from the
/// future never moves playback backwards.
pub fn correct(snapshot: &PlaybackSnapshot, now_ms: u64) -> CorrectedTarget {
    let position_secs = match snapshot.play_state {
        PlayState::Paused => snapshot.position_secs,
        PlayState::Playing => {
            let elapsed_ms = now_ms.saturating_sub(snapshot.issued_at_ms);
            snapshot.position_secs + elapsed_ms as f64 / 1000.0
        }
    };

    CorrectedTarget {
        position_secs,
        play_state: snapshot.play_state,
    }
}

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_700_000_000_000;

    fn snapshot(play_state: PlayState, position_secs: f64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_id: Some("t1".to_string()),
            play_state,
            position_secs,
            issued_at_ms: T,
        }
    }

    #[test]
    fn test_playing_snapshot_advances_by_elapsed_time() {
        let target = correct(&snapshot(PlayState::Playing, 100.0), T + 3000);
        assert_eq!(
            target,
            CorrectedTarget {
                position_secs: 103.0,
                play_state: PlayState::Playing,
            }
        );
    }

    #[test]
    fn test_paused_snapshot_ignores_elapsed_time() {
        let paused = snapshot(PlayState::Paused, 100.0);
        for now in [T, T + 3000, T + 60_000, T - 5000] {
            let target = correct(&paused, now);
            assert_eq!(target.position_secs, 100.0);
            assert_eq!(target.play_state, PlayState::Paused);
        }
    }

    #[test]
    fn test_same_inputs_give_same_target() {
        let playing = snapshot(PlayState::Playing, 42.5);
        assert_eq!(correct(&playing, T + 1234), correct(&playing, T + 1234));
    }

    #[test]
    fn test_later_now_never_moves_backwards() {
        let playing = snapshot(PlayState::Playing, 10.0);
        let mut previous = correct(&playing, T - 2000).position_secs;
        for step in 0..20 {
            let now = T - 2000 + step * 250;
            let position = correct(&playing, now).position_secs;
            assert!(position >= previous, "{position} < {previous} at {now}");
            previous = position;
        }
    }

    #[test]
    fn test_future_timestamp_is_floored() {
        let playing = snapshot(PlayState::Playing, 10.0);
        let target = correct(&playing, T - 10_000);
        assert_eq!(target.position_secs, 10.0);
    }

    #[test]
    fn test_no_duration_clamp() {
        // Clamping belongs to the player adapter's seek
        let playing = snapshot(PlayState::Playing, 7200.0);
        assert_eq!(correct(&playing, T + 5000).position_secs, 7205.0);
    }
}
