//! Typed translation stream events decoded from SSE frames.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::document::{SegmentId, Translation};
use crate::sse::SseFrame;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("unknown event `{0}`")]
    Unknown(String),
    #[error("malformed `{event}` payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One event of a translation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The server started work on these segments.
    Start { ids: Vec<SegmentId> },
    /// A fragment of generated text.
    Token { text: String },
    /// The batch model output was parsed into per-segment results.
    ParseComplete,
    /// One segment of a batch is finished.
    SegmentComplete {
        id: SegmentId,
        translation: Translation,
    },
    /// The single-segment endpoint produced its full result.
    Translation { translation: Translation },
    /// The server switched to its fallback strategy.
    FallbackStart { reason: String },
    Done {
        ids: Vec<SegmentId>,
        completed: Vec<SegmentId>,
    },
    Error {
        message: String,
        id: Option<SegmentId>,
    },
}

impl StreamEvent {
    /// Decode a frame by its event name.
    pub fn decode(frame: &SseFrame) -> Result<Self, EventError> {
        let event = frame.event.as_str();
        let data = &frame.data;
        let decoded = match event {
            "start" => {
                let p: StartPayload = payload(event, data)?;
                let mut ids = p.segment_ids;
                ids.extend(p.segment_id.map(|WireId(id)| id));
                StreamEvent::Start { ids }
            }
            "token" => match data {
                Value::String(raw) => StreamEvent::Token { text: raw.clone() },
                _ => {
                    let p: TokenPayload = payload(event, data)?;
                    StreamEvent::Token { text: p.content }
                }
            },
            "parse_complete" => StreamEvent::ParseComplete,
            "segment_complete" => {
                let p: SegmentCompletePayload = payload(event, data)?;
                StreamEvent::SegmentComplete {
                    id: p.segment_id.0,
                    translation: p.translation,
                }
            }
            "translation" => {
                let translation = match data.get("translation") {
                    Some(inner) => payload(event, inner)?,
                    None => payload(event, data)?,
                };
                StreamEvent::Translation { translation }
            }
            "fallback_start" => {
                let p: FallbackPayload = payload(event, data)?;
                StreamEvent::FallbackStart { reason: p.reason }
            }
            "done" => {
                let p: DonePayload = payload(event, data)?;
                StreamEvent::Done {
                    ids: p.segment_ids,
                    completed: p.completed,
                }
            }
            "error" => match data {
                Value::String(raw) => StreamEvent::Error {
                    message: raw.clone(),
                    id: None,
                },
                _ => {
                    let p: ErrorPayload = payload(event, data)?;
                    StreamEvent::Error {
                        message: p.error,
                        id: p.segment_id.map(|WireId(id)| id),
                    }
                }
            },
            other => return Err(EventError::Unknown(other.to_string())),
        };
        Ok(decoded)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Token { .. } => "token",
            StreamEvent::ParseComplete => "parse_complete",
            StreamEvent::SegmentComplete { .. } => "segment_complete",
            StreamEvent::Translation { .. } => "translation",
            StreamEvent::FallbackStart { .. } => "fallback_start",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: &Value) -> Result<T, EventError> {
    T::deserialize(data).map_err(|source| EventError::Malformed {
        event: event.to_string(),
        source,
    })
}

/// Segment id as sent on the wire: either a number or a numeric string.
#[derive(Debug, Clone, Copy)]
struct WireId(SegmentId);

impl<'de> Deserialize<'de> for WireId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(WireId(SegmentId(n))),
            Raw::Text(s) => s
                .trim()
                .parse::<u64>()
                .map(|n| WireId(SegmentId(n)))
                .map_err(|_| serde::de::Error::custom(format!("invalid segment id `{s}`"))),
        }
    }
}

#[derive(Deserialize)]
struct StartPayload {
    #[serde(default)]
    segment_ids: Vec<SegmentId>,
    #[serde(default)]
    segment_id: Option<WireId>,
}

#[derive(Deserialize)]
struct TokenPayload {
    content: String,
}

#[derive(Deserialize)]
struct SegmentCompletePayload {
    segment_id: WireId,
    translation: Translation,
}

#[derive(Deserialize)]
struct FallbackPayload {
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default)]
    segment_ids: Vec<SegmentId>,
    #[serde(default)]
    completed: Vec<SegmentId>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: String,
    #[serde(default)]
    segment_id: Option<WireId>,
}
