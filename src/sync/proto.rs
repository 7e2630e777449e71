use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// `format` tag for HTML message bodies.
pub const HTML_FORMAT: &str = "org.matrix.custom.html";
/// Event type of room messages.
pub const ROOM_MESSAGE_EVENT: &str = "m.room.message";
pub const MSGTYPE_TEXT: &str = "m.text";
pub const MSGTYPE_NOTICE: &str = "m.notice";

/// Normalized `/sync` response.
///
/// `rooms` maps each joined room id to the timeline events delivered for it
/// in this batch. Rooms keep the server's order, events keep delivery order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncResponse {
    pub next_batch: String,
    pub rooms: IndexMap<String, Vec<TimelineEvent>>,
}

impl SyncResponse {
    /// Total number of timeline events across all rooms.
    pub fn event_count(&self) -> usize {
        self.rooms.values().map(Vec::len).sum()
    }
}

/// `/sync` body as sent by the server. Any level may be missing or `null`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawSyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: Option<RawRooms>,
}

#[derive(Debug, Deserialize)]
struct RawRooms {
    #[serde(default)]
    join: Option<IndexMap<String, RawJoinedRoom>>,
}

#[derive(Debug, Deserialize)]
struct RawJoinedRoom {
    #[serde(default)]
    timeline: Option<RawTimeline>,
}

#[derive(Debug, Deserialize)]
struct RawTimeline {
    #[serde(default)]
    events: Option<Vec<Value>>,
}

impl From<RawSyncResponse> for SyncResponse {
    fn from(raw: RawSyncResponse) -> Self {
        let rooms = raw
            .rooms
            .and_then(|rooms| rooms.join)
            .unwrap_or_default()
            .into_iter()
            .map(|(room_id, room)| {
                let events = room
                    .timeline
                    .and_then(|timeline| timeline.events)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|event| decode_event(&room_id, event))
                    .collect();
                (room_id, events)
            })
            .collect();

        Self {
            next_batch: raw.next_batch,
            rooms,
        }
    }
}

/// Decodes one timeline entry. Entries that are not JSON objects are dropped.
fn decode_event(room_id: &str, event: Value) -> Option<TimelineEvent> {
    match serde_json::from_value(event) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(event = "timeline_entry_skipped", room_id = %room_id, error = %err);
            None
        }
    }
}

/// One event from a room timeline.
///
/// Event fields are sender-controlled, so decoding never fails on them: a
/// field of the wrong JSON type reads as empty or `None`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub event_type: String,
    #[serde(
        default,
        deserialize_with = "lenient_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_server_ts: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: EventContent,
}

impl TimelineEvent {
    pub fn is_room_message(&self) -> bool {
        self.event_type == ROOM_MESSAGE_EVENT
    }
}

/// Event content. Message and membership fields are typed, anything else is
/// kept in `extra`. A typed field holding a non-string value reads as `None`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EventContent {
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub msgtype: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub format: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub formatted_body: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub membership: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub displayname: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(lenient_opt_string(d)?.unwrap_or_default())
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(Value::deserialize(d)?.as_u64())
}

fn lenient_content<'de, D: Deserializer<'de>>(d: D) -> Result<EventContent, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(map) => serde_json::from_value(Value::Object(map)).unwrap_or_default(),
        _ => EventContent::default(),
    })
}

/// Content of an outbound `m.room.message` with an HTML body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMessageContent {
    pub msgtype: String,
    pub format: String,
    pub body: String,
    pub formatted_body: String,
}

impl RoomMessageContent {
    pub fn html(msgtype: impl Into<String>, body: String, formatted_body: String) -> Self {
        Self {
            msgtype: msgtype.into(),
            format: HTML_FORMAT.to_string(),
            body,
            formatted_body,
        }
    }
}

/// Acknowledgement of a sent event.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendEventResponse {
    #[serde(default)]
    pub event_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhoAmI {
    pub user_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinedRooms {
    #[serde(default)]
    pub joined_rooms: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub displayname: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomName {
    #[serde(default)]
    pub name: String,
}

/// Standard Matrix error body.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct MatrixErrorBody {
    pub errcode: String,
    #[serde(default)]
    pub error: Option<String>,
}
