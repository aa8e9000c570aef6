//! WebSocket frames exchanged with the chat backend, and the push events they carry.
//!
//! Client → server is always a `call`. Server → client is a `result` or
//! `error` answering a call, or an `event` pushed on its own.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Message;

/// Client → server: invoke a backend method with positional params.
#[derive(Debug, Clone, Serialize)]
pub struct CallMessage<'a> {
    #[serde(rename = "type")]
    pub typ: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> CallMessage<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            typ: "call",
            id,
            method,
            params,
        }
    }
}

/// Server → client: successful call result. `result` is null for void methods.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
}

/// Server → client: the call failed.
#[derive(Debug, Clone, Deserialize)]
pub struct CallErrorMessage {
    pub id: u64,
    pub error: String,
}

/// Server → client: a push event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

/// One server message; discriminator is JSON "type" field.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Result { id: u64, result: Value },
    Error { id: u64, error: String },
    Event { name: String, data: Value },
}

impl ServerMessage {
    pub fn from_json(value: &Value) -> Result<Self, String> {
        let typ = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or("missing type")?;
        match typ {
            "result" => {
                let m: ResultMessage =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(ServerMessage::Result {
                    id: m.id,
                    result: m.result,
                })
            }
            "error" => {
                let m: CallErrorMessage =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(ServerMessage::Error {
                    id: m.id,
                    error: m.error,
                })
            }
            "event" => {
                let m: EventMessage =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(ServerMessage::Event {
                    name: m.name,
                    data: m.data,
                })
            }
            _ => Err(format!("unknown type: {}", typ)),
        }
    }
}

/// Names of the push events the synchronizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StreamStart,
    StreamResponse,
    StreamEnd,
    StreamError,
    TitleUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::StreamStart,
        EventKind::StreamResponse,
        EventKind::StreamEnd,
        EventKind::StreamError,
        EventKind::TitleUpdated,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::StreamStart => "stream:start",
            EventKind::StreamResponse => "stream:response",
            EventKind::StreamEnd => "stream:end",
            EventKind::StreamError => "stream:error",
            EventKind::TitleUpdated => "conversation:title-updated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// A decoded push event.
///
/// Payload fields are optional: a frame missing `chunk`, `message` or
/// `error` still decodes, and the handler decides what a gap means.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    StreamStart {
        conversation_id: Option<String>,
    },
    StreamResponse {
        conversation_id: Option<String>,
        chunk: Option<String>,
    },
    StreamEnd {
        conversation_id: Option<String>,
        message: Option<Message>,
    },
    StreamError {
        conversation_id: Option<String>,
        error: Option<String>,
    },
    TitleUpdated {
        conversation_id: String,
        title: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl PushEvent {
    /// Decode an `event` frame. Returns `None` for event names outside
    /// [`EventKind`] and for title updates lacking an id or title.
    pub fn from_wire(name: &str, data: &Value) -> Option<Self> {
        let kind = EventKind::from_name(name)?;
        let payload: EventPayload = serde_json::from_value(data.clone()).unwrap_or_default();
        let conversation_id = payload.conversation_id;
        let event = match kind {
            EventKind::StreamStart => PushEvent::StreamStart { conversation_id },
            EventKind::StreamResponse => PushEvent::StreamResponse {
                conversation_id,
                chunk: payload.chunk,
            },
            EventKind::StreamEnd => PushEvent::StreamEnd {
                conversation_id,
                message: payload
                    .message
                    .and_then(|m| serde_json::from_value::<Message>(m).ok()),
            },
            EventKind::StreamError => PushEvent::StreamError {
                conversation_id,
                error: payload.error,
            },
            EventKind::TitleUpdated => PushEvent::TitleUpdated {
                conversation_id: conversation_id?,
                title: payload.title?,
            },
        };
        Some(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::StreamStart { .. } => EventKind::StreamStart,
            PushEvent::StreamResponse { .. } => EventKind::StreamResponse,
            PushEvent::StreamEnd { .. } => EventKind::StreamEnd,
            PushEvent::StreamError { .. } => EventKind::StreamError,
            PushEvent::TitleUpdated { .. } => EventKind::TitleUpdated,
        }
    }
}
