//! Sync tuning knobs

/// Default drift (seconds) tolerated before a corrective seek
pub const DEFAULT_DRIFT_TOLERANCE_SECS: f64 = 1.0;

/// Default time a corrective seek is given to settle before the next check
pub const DEFAULT_CORRECTION_COOLDOWN_MS: u64 = 100;

/// Default remaining time (seconds) under which a finish report counts as end of track
pub const DEFAULT_END_OF_TRACK_EPSILON_SECS: f64 = 0.5;

/// Default engine progress callback interval
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// Tolerances and intervals used by the synchronizer
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Maximum drift in seconds before we seek to the target
    pub drift_tolerance_secs: f64,
    /// How long the correction guard stays engaged after a seek
    pub correction_cooldown_ms: u64,
    /// Remaining time in seconds below which "finished" is trusted
    pub end_of_track_epsilon_secs: f64,
    /// Progress tick interval requested from the media engine
    pub progress_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_tolerance_secs: DEFAULT_DRIFT_TOLERANCE_SECS,
            correction_cooldown_ms: DEFAULT_CORRECTION_COOLDOWN_MS,
            end_of_track_epsilon_secs: DEFAULT_END_OF_TRACK_EPSILON_SECS,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}
