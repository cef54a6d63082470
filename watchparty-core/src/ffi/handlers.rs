//! Session actor and native adapters
//!
//! A single task owns the synchronizer. Inbound events, player callbacks and
//! user commands are queued onto it, so reconciliation never runs twice at
//! once and no state needs locking.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::channel::{ChannelError, CommandChannel};
use crate::clock::current_time_ms;
use crate::player::{EngineEvent, LoadRequest as InternalLoadRequest, MediaEngine};
use crate::sync::{
    CommandOutcome as InternalCommandOutcome, InboundEvent, Notice as InternalNotice,
    OutboundCommand, PlaybackSynchronizer, PlaybackView as InternalPlaybackView, SessionFlow,
    SessionId, SkipDirection as InternalSkipDirection,
};

use super::types::{LoadRequest, Notice, PlaybackView, PlayerEngine, RoomTransport, SessionListener};

pub(super) type SharedListener = Arc<RwLock<Option<Arc<dyn SessionListener>>>>;

/// Callback queued for the listener thread
#[derive(Debug)]
pub(super) enum ListenerEvent {
    View(PlaybackView),
    Notice(Notice),
    Ended(String),
}

/// Deliver listener callbacks from their own thread until the session task
/// drops its sender. Callbacks can then call back into the session.
pub(super) fn spawn_dispatcher(
    listener: SharedListener,
    mut events_rx: mpsc::UnboundedReceiver<ListenerEvent>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("watchparty-listener".to_string())
        .spawn(move || {
            while let Some(event) = events_rx.blocking_recv() {
                // Clone out so the lock is not held across the callback
                let Some(cb) = listener.read().clone() else {
                    continue;
                };
                match event {
                    ListenerEvent::View(view) => cb.on_view_changed(view),
                    ListenerEvent::Notice(notice) => cb.on_notice(notice),
                    ListenerEvent::Ended(reason) => cb.on_session_ended(reason),
                }
            }
            debug!("Listener dispatch stopped");
        })
}

/// `MediaEngine` backed by the native player
pub(super) struct NativeEngine(pub Box<dyn PlayerEngine>);

impl MediaEngine for NativeEngine {
    fn load(&mut self, request: &InternalLoadRequest) {
        self.0.load(LoadRequest::from(request));
    }

    fn set_position(&mut self, position_secs: f64) {
        self.0.set_position(position_secs);
    }

    fn play(&mut self) {
        self.0.play();
    }

    fn pause(&mut self) {
        self.0.pause();
    }
}

/// `CommandChannel` backed by the native socket
pub(super) struct NativeTransport(pub Box<dyn RoomTransport>);

impl CommandChannel for NativeTransport {
    fn send(&mut self, room_code: &str, command: &OutboundCommand) -> Result<(), ChannelError> {
        if !self.0.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let payload = command.encode(room_code)?;
        self.0.emit(command.event_name().to_string(), payload);
        Ok(())
    }
}

/// Work queued onto the session task
pub(super) enum SessionInput {
    Event(InboundEvent),
    PlayerEvent {
        session_id: SessionId,
        event: EngineEvent,
    },
    TogglePlayPause(oneshot::Sender<InternalCommandOutcome>),
    Seek {
        position_secs: f64,
        reply: oneshot::Sender<InternalCommandOutcome>,
    },
    Skip {
        direction: InternalSkipDirection,
        reply: oneshot::Sender<InternalCommandOutcome>,
    },
    Reload(oneshot::Sender<bool>),
    View(oneshot::Sender<InternalPlaybackView>),
    Leave,
}

/// Handle to a running session task
pub(super) struct SessionHandle {
    pub session_id: SessionId,
    pub input_tx: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    pub fn is_running(&self) -> bool {
        !self.input_tx.is_closed()
    }
}

/// Run a session until it is left or we are removed from the room.
/// Returns the engine and channel once the session is torn down.
pub(super) async fn run_session<E: MediaEngine, C: CommandChannel>(
    mut sync: PlaybackSynchronizer<E, C>,
    mut input_rx: mpsc::UnboundedReceiver<SessionInput>,
    events: mpsc::UnboundedSender<ListenerEvent>,
) -> (E, C) {
    info!("Session task started ({})", sync.session_id());
    publish(&mut sync, &events);

    loop {
        let wakeup = sync.next_wakeup_ms();
        let delay = wakeup.map_or(0, |deadline| deadline.saturating_sub(current_time_ms()));
        let mut changed = true;

        tokio::select! {
            input = input_rx.recv() => {
                let Some(input) = input else {
                    debug!("Session handle dropped");
                    break;
                };
                match &input {
                    SessionInput::Leave => break,
                    // Queries change nothing; publishing would echo back to a listener that asks
                    SessionInput::View(_) => changed = false,
                    _ => {}
                }
                if handle_input(&mut sync, input) == SessionFlow::Ended {
                    let reason = publish(&mut sync, &events)
                        .unwrap_or_else(|| "Removed from room".to_string());
                    let _ = events.send(ListenerEvent::Ended(reason));
                    break;
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(delay)), if wakeup.is_some() => {
                sync.poll_timer(current_time_ms());
            }
        }

        if changed {
            publish(&mut sync, &events);
        }
    }

    info!("Session task stopped ({})", sync.session_id());
    sync.leave()
}

fn handle_input<E: MediaEngine, C: CommandChannel>(
    sync: &mut PlaybackSynchronizer<E, C>,
    input: SessionInput,
) -> SessionFlow {
    let now_ms = current_time_ms();
    match input {
        SessionInput::Event(event) => return sync.handle_event(event, now_ms),
        SessionInput::PlayerEvent { session_id, event } => {
            sync.handle_engine_event(session_id, event, now_ms);
        }
        SessionInput::TogglePlayPause(reply) => {
            let _ = reply.send(sync.toggle_play_pause());
        }
        SessionInput::Seek {
            position_secs,
            reply,
        } => {
            let _ = reply.send(sync.request_seek(position_secs));
        }
        SessionInput::Skip { direction, reply } => {
            let _ = reply.send(sync.request_skip(direction));
        }
        SessionInput::Reload(reply) => {
            let _ = reply.send(sync.reload(now_ms));
        }
        SessionInput::View(reply) => {
            let _ = reply.send(sync.view(now_ms));
        }
        SessionInput::Leave => {}
    }
    SessionFlow::Continue
}

/// Queue notices and the current view for the listener.
/// Returns the removal reason if one was among the notices.
fn publish<E: MediaEngine, C: CommandChannel>(
    sync: &mut PlaybackSynchronizer<E, C>,
    events: &mpsc::UnboundedSender<ListenerEvent>,
) -> Option<String> {
    let notices = sync.drain_notices();
    let removed = notices.iter().find_map(|n| match n {
        InternalNotice::RemovedFromRoom(reason) => Some(reason.clone()),
        _ => None,
    });

    for notice in notices {
        let _ = events.send(ListenerEvent::Notice(notice.into()));
    }
    let _ = events.send(ListenerEvent::View(sync.view(current_time_ms()).into()));
    removed
}
