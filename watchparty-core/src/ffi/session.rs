//! Session implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::RwLock;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::clock::current_time_ms;
use crate::config::SyncConfig;
use crate::sync::{InboundEvent, PlaybackSynchronizer, ProtocolError, SessionId};

use super::handlers::{
    run_session, spawn_dispatcher, NativeEngine, NativeTransport, SessionHandle, SessionInput,
    SharedListener,
};
use super::types::*;

static TRACING_INIT: Once = Once::new();

/// Watch party session: one joined room at a time
#[derive(uniffi::Object)]
pub struct WatchSession {
    runtime: Runtime,
    listener: SharedListener,
    handle: RwLock<Option<SessionHandle>>,
}

#[uniffi::export]
impl WatchSession {
    /// Create a new session
    #[uniffi::constructor]
    pub fn new() -> Result<Self, CoreError> {
        TRACING_INIT.call_once(|| {
            let mut filter = tracing_subscriber::EnvFilter::from_default_env();
            if let Ok(directive) = "watchparty_core=debug".parse() {
                filter = filter.add_directive(directive);
            }
            let _ = tracing_subscriber::fmt()
                .with_ansi(false) // Xcode / logcat don't render colors
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!("Initializing watchparty-core session");

        let runtime = Runtime::new().map_err(|e| CoreError::Runtime(e.to_string()))?;

        Ok(Self {
            runtime,
            listener: Arc::new(RwLock::new(None)),
            handle: RwLock::new(None),
        })
    }

    /// Set the event listener
    pub fn set_listener(&self, listener: Box<dyn SessionListener>) {
        *self.listener.write() = Some(Arc::from(listener));
    }

    /// Join a room from its `joinedSession` payload.
    ///
    /// Returns the session id the player must echo back in `on_player_status`.
    /// The first track is opened on the session thread after this returns.
    pub fn join(
        &self,
        room_code: String,
        local_user_id: String,
        joined_payload: String,
        engine: Box<dyn PlayerEngine>,
        transport: Box<dyn RoomTransport>,
        settings: Option<SyncSettings>,
    ) -> Result<u64, CoreError> {
        let joined = match InboundEvent::decode("joinedSession", &joined_payload)? {
            InboundEvent::JoinedSession(joined) => joined,
            other => return Err(CoreError::InvalidEvent(format!("{:?}", other))),
        };
        let config = settings.map(SyncConfig::from).unwrap_or_default();
        let session_id = SessionId::random();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        {
            let mut handle = self.handle.write();
            if handle.as_ref().is_some_and(SessionHandle::is_running) {
                return Err(CoreError::AlreadyInSession);
            }

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            spawn_dispatcher(Arc::clone(&self.listener), events_rx)
                .map_err(|e| CoreError::Runtime(e.to_string()))?;

            // Registered before the task starts so the engine can report from `load`
            *handle = Some(SessionHandle {
                session_id,
                input_tx,
            });

            self.runtime.spawn(async move {
                let sync = PlaybackSynchronizer::join(
                    session_id,
                    room_code,
                    local_user_id,
                    joined,
                    NativeEngine(engine),
                    NativeTransport(transport),
                    config,
                    current_time_ms(),
                );
                run_session(sync, input_rx, events_tx).await;
            });
        }

        Ok(session_id.0)
    }

    /// Feed an event received on the room socket
    pub fn handle_event(&self, name: String, payload: String) -> Result<(), CoreError> {
        let event = match InboundEvent::decode(&name, &payload) {
            Ok(event) => event,
            Err(ProtocolError::UnknownEvent(name)) => {
                debug!("Ignoring room event {}", name);
                return Ok(());
            }
            Err(e) => {
                warn!("Bad room event: {}", e);
                return Err(e.into());
            }
        };
        self.send(SessionInput::Event(event))
    }

    /// Feed a status callback from the native player.
    ///
    /// Callbacks for a session that has since been left are dropped.
    pub fn on_player_status(&self, session_id: u64, status: PlayerStatus) {
        let input = SessionInput::PlayerEvent {
            session_id: SessionId(session_id),
            event: status.into(),
        };
        if self.send(input).is_err() {
            debug!("Dropping player status, no session");
        }
    }

    /// Ask the room to toggle play/pause
    pub fn toggle_play_pause(&self) -> Result<CommandOutcome, CoreError> {
        self.request(SessionInput::TogglePlayPause).map(Into::into)
    }

    /// Ask the room to seek
    pub fn seek(&self, position_secs: f64) -> Result<CommandOutcome, CoreError> {
        self.request(|reply| SessionInput::Seek {
            position_secs,
            reply,
        })
        .map(Into::into)
    }

    /// Ask the room to move through the queue
    pub fn skip(&self, direction: SkipDirection) -> Result<CommandOutcome, CoreError> {
        self.request(|reply| SessionInput::Skip {
            direction: direction.into(),
            reply,
        })
        .map(Into::into)
    }

    /// Reload the current track after a playback error
    pub fn reload(&self) -> Result<bool, CoreError> {
        self.request(SessionInput::Reload)
    }

    /// Current state of the player controls
    pub fn playback_view(&self) -> Result<PlaybackView, CoreError> {
        self.request(SessionInput::View).map(Into::into)
    }

    /// Id of the current session, if any
    pub fn session_id(&self) -> Option<u64> {
        self.handle
            .read()
            .as_ref()
            .filter(|h| h.is_running())
            .map(|h| h.session_id.0)
    }

    /// Check if we are in a room
    pub fn is_in_session(&self) -> bool {
        self.session_id().is_some()
    }

    /// Leave the current room
    pub fn leave(&self) -> Result<(), CoreError> {
        let handle = self.handle.write().take().ok_or(CoreError::NotInSession)?;
        let _ = handle.input_tx.send(SessionInput::Leave);
        info!("Left session {}", handle.session_id);
        Ok(())
    }
}

impl WatchSession {
    fn send(&self, input: SessionInput) -> Result<(), CoreError> {
        let handle = self.handle.read();
        let handle = handle.as_ref().ok_or(CoreError::NotInSession)?;
        handle
            .input_tx
            .send(input)
            .map_err(|_| CoreError::SessionClosed)
    }

    /// Round-trip through the session task. Refused on runtime threads,
    /// where waiting would stall the task that has to answer.
    fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionInput,
    ) -> Result<T, CoreError> {
        if Handle::try_current().is_ok() {
            warn!("Blocking session call from a runtime thread");
            return Err(CoreError::Reentrant);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx))?;
        reply_rx.blocking_recv().map_err(|_| CoreError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;
    use serde_json::json;

    /// Lets callbacks reach the session that owns them
    #[derive(Default)]
    struct SessionSlot(OnceLock<Arc<WatchSession>>);

    impl SessionSlot {
        fn session(&self) -> &WatchSession {
            self.0.get().expect("session installed before join")
        }
    }

    fn joined_payload() -> String {
        json!({
            "currentState": {
                "current_playlist_id": "t1",
                "is_playing": "paused",
                "current_time": 12.0,
                "updated_at": current_time_ms(),
            },
            "members": [{ "user": "me", "role": "member" }],
            "playlistItems": [{ "_id": "t1", "position": 1, "video": "v1" }],
        })
        .to_string()
    }

    struct SilentEngine;

    impl PlayerEngine for SilentEngine {
        fn load(&self, _request: LoadRequest) {}
        fn set_position(&self, _position_secs: f64) {}
        fn play(&self) {}
        fn pause(&self) {}
    }

    struct OfflineTransport;

    impl RoomTransport for OfflineTransport {
        fn is_connected(&self) -> bool {
            false
        }
        fn emit(&self, _event: String, _payload: String) {}
    }

    /// Reads the view back from inside the view callback
    struct QueryingListener {
        slot: Arc<SessionSlot>,
        views: Mutex<std::sync::mpsc::Sender<Result<PlaybackView, CoreError>>>,
    }

    impl SessionListener for QueryingListener {
        fn on_view_changed(&self, _view: PlaybackView) {
            let view = self.slot.session().playback_view();
            let _ = self.views.lock().send(view);
        }
        fn on_notice(&self, _notice: Notice) {}
        fn on_session_ended(&self, _reason: String) {}
    }

    /// Reports ready from inside `load`, like players that open synchronously
    struct EagerEngine {
        slot: Arc<SessionSlot>,
        reentry_refused: Arc<AtomicBool>,
    }

    impl PlayerEngine for EagerEngine {
        fn load(&self, request: LoadRequest) {
            let session = self.slot.session();
            if let Some(id) = session.session_id() {
                session.on_player_status(
                    id,
                    PlayerStatus {
                        position_secs: request.initial_position_secs,
                        duration_secs: Some(600.0),
                        playable_secs: Some(120.0),
                        is_playing: false,
                        is_buffering: false,
                        did_just_finish: false,
                        error: None,
                    },
                );
            }
            let refused = matches!(session.playback_view(), Err(CoreError::Reentrant));
            self.reentry_refused.store(refused, Ordering::SeqCst);
        }
        fn set_position(&self, _position_secs: f64) {}
        fn play(&self) {}
        fn pause(&self) {}
    }

    #[test]
    fn test_listener_can_query_session() {
        let slot = Arc::new(SessionSlot::default());
        let session = Arc::new(WatchSession::new().unwrap());
        let _ = slot.0.set(Arc::clone(&session));

        let (views_tx, views_rx) = std::sync::mpsc::channel();
        session.set_listener(Box::new(QueryingListener {
            slot: Arc::clone(&slot),
            views: Mutex::new(views_tx),
        }));

        session
            .join(
                "ROOM".to_string(),
                "me".to_string(),
                joined_payload(),
                Box::new(SilentEngine),
                Box::new(OfflineTransport),
                None,
            )
            .unwrap();

        let view = views_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("listener was called")
            .expect("view readable from the listener");
        assert_eq!(view.track_id.as_deref(), Some("t1"));
        assert!(view.controls_locked);

        // The session task survived the nested call
        assert!(session.is_in_session());
        assert_eq!(session.toggle_play_pause().unwrap(), CommandOutcome::NotPermitted);
        session.leave().unwrap();
    }

    #[test]
    fn test_engine_may_report_from_inside_load() {
        let slot = Arc::new(SessionSlot::default());
        let session = Arc::new(WatchSession::new().unwrap());
        let _ = slot.0.set(Arc::clone(&session));
        let reentry_refused = Arc::new(AtomicBool::new(false));

        session
            .join(
                "ROOM".to_string(),
                "me".to_string(),
                joined_payload(),
                Box::new(EagerEngine {
                    slot: Arc::clone(&slot),
                    reentry_refused: Arc::clone(&reentry_refused),
                }),
                Box::new(OfflineTransport),
                None,
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let view = loop {
            let view = session.playback_view().unwrap();
            if !view.is_loading {
                break view;
            }
            assert!(Instant::now() < deadline, "player never became ready");
            std::thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(view.track_id.as_deref(), Some("t1"));
        assert!(reentry_refused.load(Ordering::SeqCst));
        session.leave().unwrap();
    }

    #[test]
    fn test_second_join_is_refused() {
        let session = WatchSession::new().unwrap();
        let join = || {
            session.join(
                "ROOM".to_string(),
                "me".to_string(),
                joined_payload(),
                Box::new(SilentEngine),
                Box::new(OfflineTransport),
                None,
            )
        };

        let id = join().unwrap();
        assert_eq!(session.session_id(), Some(id));
        assert!(matches!(join(), Err(CoreError::AlreadyInSession)));

        session.leave().unwrap();
        assert!(!session.is_in_session());
        assert!(matches!(session.playback_view(), Err(CoreError::NotInSession)));
    }
}
