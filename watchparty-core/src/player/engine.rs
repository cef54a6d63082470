//! Media engine seam

/// Everything the engine needs to start a track
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub track_id: String,
    /// Media URI, when the queue knows it
    pub source_url: Option<String>,
    /// Position to open at, so a late joiner never flashes frame 0
    pub initial_position_secs: f64,
    pub should_play: bool,
    /// How often the engine should report progress
    pub progress_interval_ms: u64,
}

/// A concrete media engine.
///
/// Commands are fire-and-forget: their effect shows up in a later
/// [`EngineEvent`], never in a return value.
pub trait MediaEngine {
    fn load(&mut self, request: &LoadRequest);
    fn set_position(&mut self, position_secs: f64);
    fn play(&mut self);
    fn pause(&mut self);
}

/// Progress/status report from a loaded engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStatus {
    pub position_secs: f64,
    /// Unknown until the engine has read enough of the media
    pub duration_secs: Option<f64>,
    /// How far ahead the engine has buffered
    pub playable_secs: Option<f64>,
    pub is_playing: bool,
    pub is_buffering: bool,
    /// Natural completion was reached since the previous report
    pub did_just_finish: bool,
}

/// Callback input from the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Status(EngineStatus),
    /// Unrecoverable playback error
    Failed(String),
}
