//! Sync Protocol Messages
//!
//! Field names follow the room socket's JSON payloads.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding inbound room events
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown room event: {0}")]
    UnknownEvent(String),

    #[error("Malformed {event} payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared play state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
}

/// Authoritative playback state issued by the server.
///
/// `position_secs` is only meaningful together with `issued_at_ms`; keep the
/// whole snapshot around rather than either field on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    /// Active queue item, absent when nothing is playing
    #[serde(rename = "current_playlist_id", default)]
    pub track_id: Option<String>,
    #[serde(rename = "is_playing")]
    pub play_state: PlayState,
    /// Playback offset when the snapshot was produced
    #[serde(rename = "current_time")]
    pub position_secs: f64,
    /// Server wall clock (ms since epoch) when the snapshot was produced
    #[serde(rename = "updated_at")]
    pub issued_at_ms: u64,
}

/// Participant role in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Moderator,
    Member,
}

impl Role {
    /// Whether this role may issue transport commands
    pub fn can_control(self) -> bool {
        !matches!(self, Role::Member)
    }
}

/// A member's user reference; the server sends either a bare id or a profile
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MemberUser {
    Id(String),
    Profile {
        #[serde(alias = "_id")]
        id: String,
    },
}

impl MemberUser {
    pub fn id(&self) -> &str {
        match self {
            MemberUser::Id(id) => id,
            MemberUser::Profile { id } => id,
        }
    }
}

/// Entry in the room's member list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomMember {
    pub user: MemberUser,
    pub role: Role,
}

/// The video a queue item points at
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueueVideo {
    Id(String),
    Episode {
        #[serde(alias = "_id")]
        id: String,
        #[serde(default)]
        title: Option<String>,
        /// HLS master playlist
        #[serde(rename = "masterM3u8Minio", default)]
        source_url: Option<String>,
    },
}

/// Item in the shared playback queue
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueItem {
    #[serde(alias = "_id")]
    pub id: String,
    pub position: i64,
    #[serde(default)]
    pub video: Option<QueueVideo>,
}

impl QueueItem {
    /// Media URI handed to the engine when this item is loaded
    pub fn source_url(&self) -> Option<&str> {
        match &self.video {
            Some(QueueVideo::Episode { source_url, .. }) => source_url.as_deref(),
            _ => None,
        }
    }
}

/// Full room state delivered when we join
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedSession {
    #[serde(default)]
    pub current_state: Option<PlaybackSnapshot>,
    #[serde(default)]
    pub members: Vec<RoomMember>,
    #[serde(default)]
    pub playlist_items: Vec<QueueItem>,
}

/// Kind of change applied to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistAction {
    Add,
    Remove,
    Reorder,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaylistUpdate {
    pub item: QueueItem,
    pub action: PlaylistAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChange {
    pub user_id: String,
    pub new_role: Role,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKicked {
    pub user_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForceDisconnect {
    #[serde(default)]
    pub reason: String,
}

/// Events received on the room channel
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Session bootstrap
    JoinedSession(JoinedSession),
    /// Play/pause
    StateChanged(PlaybackSnapshot),
    Seeked(PlaybackSnapshot),
    TrackChanged(PlaybackSnapshot),
    /// Combined state event; the track change is detected by id
    VideoChanged(PlaybackSnapshot),
    PlaylistUpdated(PlaylistUpdate),
    UserRoleChanged(RoleChange),
    UserKicked(UserKicked),
    ForceDisconnect(ForceDisconnect),
}

impl InboundEvent {
    /// Decode a named channel event with its JSON payload
    pub fn decode(name: &str, payload: &str) -> Result<Self, ProtocolError> {
        fn parse<'a, T: Deserialize<'a>>(name: &str, payload: &'a str) -> Result<T, ProtocolError> {
            serde_json::from_str(payload).map_err(|source| ProtocolError::Malformed {
                event: name.to_string(),
                source,
            })
        }

        let event = match name {
            "joinedSession" => InboundEvent::JoinedSession(parse(name, payload)?),
            "stateChanged" => InboundEvent::StateChanged(parse(name, payload)?),
            "seeked" => InboundEvent::Seeked(parse(name, payload)?),
            "trackChanged" => InboundEvent::TrackChanged(parse(name, payload)?),
            "videoChanged" => InboundEvent::VideoChanged(parse(name, payload)?),
            "playlistUpdated" => InboundEvent::PlaylistUpdated(parse(name, payload)?),
            "userRoleChanged" => InboundEvent::UserRoleChanged(parse(name, payload)?),
            "userKicked" => InboundEvent::UserKicked(parse(name, payload)?),
            "forceDisconnect" => InboundEvent::ForceDisconnect(parse(name, payload)?),
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

/// Which way to move through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDirection {
    Next,
    Previous,
}

/// Commands sent upstream; the server re-broadcasts the outcome to everyone
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutboundCommand {
    RequestPlayPause { is_playing: bool, position_secs: f64 },
    RequestSeek { position_secs: f64 },
    RequestAdvanceTrack { direction: SkipDirection },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayPausePayload<'a> {
    room_code: &'a str,
    #[serde(rename = "isplaying")]
    is_playing: bool,
    current_time: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeekPayload<'a> {
    room_code: &'a str,
    current_time: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomPayload<'a> {
    room_code: &'a str,
}

impl OutboundCommand {
    /// Channel event name for this command
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundCommand::RequestPlayPause { .. } => "playOrPauseVideo",
            OutboundCommand::RequestSeek { .. } => "seekVideo",
            OutboundCommand::RequestAdvanceTrack {
                direction: SkipDirection::Next,
            } => "nextVideo",
            OutboundCommand::RequestAdvanceTrack {
                direction: SkipDirection::Previous,
            } => "previousVideo",
        }
    }

    /// Encode the JSON payload for `room_code`
    pub fn encode(&self, room_code: &str) -> Result<String, serde_json::Error> {
        match *self {
            OutboundCommand::RequestPlayPause {
                is_playing,
                position_secs,
            } => serde_json::to_string(&PlayPausePayload {
                room_code,
                is_playing,
                current_time: position_secs,
            }),
            OutboundCommand::RequestSeek { position_secs } => serde_json::to_string(&SeekPayload {
                room_code,
                current_time: position_secs,
            }),
            OutboundCommand::RequestAdvanceTrack { .. } => {
                serde_json::to_string(&RoomPayload { room_code })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_video_changed() {
        let payload = json!({
            "current_playlist_id": "item-1",
            "is_playing": "playing",
            "current_time": 12.5,
            "updated_at": 1_700_000_000_000u64,
        })
        .to_string();

        let InboundEvent::VideoChanged(snapshot) = InboundEvent::decode("videoChanged", &payload).unwrap() else {
            panic!("expected videoChanged");
        };
        assert_eq!(snapshot.track_id.as_deref(), Some("item-1"));
        assert_eq!(snapshot.play_state, PlayState::Playing);
        assert_eq!(snapshot.position_secs, 12.5);
        assert_eq!(snapshot.issued_at_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_decode_snapshot_without_track() {
        let payload = r#"{"is_playing":"paused","current_time":0,"updated_at":5}"#;
        let InboundEvent::StateChanged(snapshot) = InboundEvent::decode("stateChanged", payload).unwrap() else {
            panic!("expected stateChanged");
        };
        assert_eq!(snapshot.track_id, None);
    }

    #[test]
    fn test_decode_joined_session() {
        let payload = json!({
            "success": true,
            "members": [
                { "user": "u1", "role": "owner" },
                { "user": { "id": "u2", "username": "bob" }, "role": "member" },
            ],
            "playlistItems": [
                {
                    "_id": "item-2",
                    "position": 2,
                    "video": { "id": "ep-2", "title": "Two", "masterM3u8Minio": "https://cdn/2.m3u8" }
                },
                { "id": "item-1", "position": 1, "video": "ep-1" },
            ],
            "currentState": null,
        })
        .to_string();

        let InboundEvent::JoinedSession(joined) = InboundEvent::decode("joinedSession", &payload).unwrap() else {
            panic!("expected joinedSession");
        };
        assert!(joined.current_state.is_none());
        assert_eq!(joined.members[0].user.id(), "u1");
        assert_eq!(joined.members[1].user.id(), "u2");
        assert_eq!(joined.members[1].role, Role::Member);
        assert_eq!(joined.playlist_items[0].id, "item-2");
        assert_eq!(joined.playlist_items[0].source_url(), Some("https://cdn/2.m3u8"));
        assert_eq!(joined.playlist_items[1].source_url(), None);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            InboundEvent::decode("newMessage", "{}"),
            Err(ProtocolError::UnknownEvent(name)) if name == "newMessage"
        ));
        assert!(matches!(
            InboundEvent::decode("seeked", r#"{"current_time": 1}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_role_control() {
        assert!(Role::Owner.can_control());
        assert!(Role::Admin.can_control());
        assert!(Role::Moderator.can_control());
        assert!(!Role::Member.can_control());
    }

    #[test]
    fn test_encode_commands() {
        let play = OutboundCommand::RequestPlayPause {
            is_playing: true,
            position_secs: 42.0,
        };
        assert_eq!(play.event_name(), "playOrPauseVideo");
        let value: serde_json::Value = serde_json::from_str(&play.encode("ABC").unwrap()).unwrap();
        assert_eq!(value, json!({ "roomCode": "ABC", "isplaying": true, "currentTime": 42.0 }));

        let seek = OutboundCommand::RequestSeek { position_secs: 7.5 };
        let value: serde_json::Value = serde_json::from_str(&seek.encode("ABC").unwrap()).unwrap();
        assert_eq!(value, json!({ "roomCode": "ABC", "currentTime": 7.5 }));

        let previous = OutboundCommand::RequestAdvanceTrack {
            direction: SkipDirection::Previous,
        };
        assert_eq!(previous.event_name(), "previousVideo");
        assert_eq!(previous.encode("ABC").unwrap(), r#"{"roomCode":"ABC"}"#);
    }
}
