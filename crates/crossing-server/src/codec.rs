//! Line-delimited JSON framing for the client protocol.
//!
//! Inbound bytes are split into lines by [`LineAccumulator`] and each line is
//! parsed into a [`ClientCommand`] by [`decode_command`]. Parsing never
//! panics and never partially applies: any problem with a line becomes a
//! single [`ProtocolError`].
//!
//! Outbound frames are built once with [`encode_status`] or
//! [`encode_error`] and shared as a [`Frame`] across every recipient.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use crossing_types::{QueryType, Route, TrafficSample, clamp_count};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EncodeError, ErrorCode, ProtocolError};

/// One encoded, newline-terminated outbound frame. Cloning is a refcount bump.
pub type Frame = Arc<str>;

/// Literal that expands to every route in `SUBSCRIBE` / `UNSUBSCRIBE`.
const ALL_ROUTES: &str = "all";

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Reassembles newline-delimited frames from arbitrarily split reads.
#[derive(Debug)]
pub struct LineAccumulator {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    discarding: bool,
}

impl LineAccumulator {
    /// Create an accumulator that rejects frames longer than `max_frame_bytes`.
    pub const fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Feed a chunk of bytes and collect every line it completes, in order.
    ///
    /// A trailing `\r` is stripped and blank lines are skipped. A frame
    /// that grows past the limit yields one `FrameTooLarge` error and the
    /// rest of it, up to the next newline, is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, ProtocolError>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = tail.get(1..).unwrap_or_default();

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(head);
            let mut line = std::mem::take(&mut self.buffer);
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.len() > self.max_frame_bytes {
                lines.push(Err(self.too_large()));
            } else if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(Ok(line));
            }
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > self.max_frame_bytes {
                self.buffer.clear();
                self.discarding = true;
                lines.push(Err(self.too_large()));
            }
        }

        lines
    }

    /// Bytes held for a frame whose newline has not arrived yet.
    pub const fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    const fn too_large(&self) -> ProtocolError {
        ProtocolError::FrameTooLarge {
            limit: self.max_frame_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Overwrite the samples of the listed routes.
    CameraUpdate(BTreeMap<Route, TrafficSample>),
    /// Add routes to the session's subscription set.
    Subscribe(BTreeSet<Route>),
    /// Remove routes from the session's subscription set.
    Unsubscribe(BTreeSet<Route>),
    /// Ask for one view of controller state.
    Query(QueryType),
}

/// The `type` discriminator of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    CameraUpdate,
    Subscribe,
    Unsubscribe,
    Query,
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CAMERA_UPDATE" => Ok(Self::CameraUpdate),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "QUERY" => Ok(Self::Query),
            other => Err(ProtocolError::UnknownType(other.to_owned())),
        }
    }
}

/// Parse and validate one inbound line.
pub fn decode_command(line: &[u8]) -> Result<ClientCommand, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_utf8| ProtocolError::InvalidUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let Value::Object(message) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let kind = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    match kind.parse::<MessageType>()? {
        MessageType::CameraUpdate => decode_camera_update(&message).map(ClientCommand::CameraUpdate),
        MessageType::Subscribe => decode_routes(&message).map(ClientCommand::Subscribe),
        MessageType::Unsubscribe => decode_routes(&message).map(ClientCommand::Unsubscribe),
        MessageType::Query => decode_query(&message).map(ClientCommand::Query),
    }
}

fn decode_camera_update(
    message: &Map<String, Value>,
) -> Result<BTreeMap<Route, TrafficSample>, ProtocolError> {
    let data = match message.get("data") {
        None | Some(Value::Null) => return Err(ProtocolError::MissingField("data")),
        Some(Value::Object(data)) => data,
        Some(_) => {
            return Err(ProtocolError::InvalidField {
                field: String::from("data"),
                reason: String::from("expected an object keyed by route"),
            });
        }
    };

    let mut samples = BTreeMap::new();
    for (key, entry) in data {
        let route: Route = key
            .parse()
            .map_err(|_parse| ProtocolError::UnknownRoute(key.clone()))?;
        let Value::Object(counts) = entry else {
            return Err(ProtocolError::InvalidField {
                field: format!("data.{route}"),
                reason: String::from("expected an object"),
            });
        };
        let vehicles = parse_count(route, "vehicles", counts.get("vehicles"))?;
        let heavy = parse_count(route, "heavyVehicles", counts.get("heavyVehicles"))?;
        samples.insert(route, TrafficSample::new(vehicles, heavy));
    }
    Ok(samples)
}

/// Missing or null counts are zero; numbers and numeric strings are clamped.
fn parse_count(route: Route, field: &str, value: Option<&Value>) -> Result<u32, ProtocolError> {
    let invalid = || ProtocolError::InvalidField {
        field: format!("data.{route}.{field}"),
        reason: String::from("expected a number"),
    };

    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(number)) => number.as_f64().map(clamp_count).ok_or_else(invalid),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|parsed| parsed.is_finite())
            .map(clamp_count)
            .ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

fn decode_routes(message: &Map<String, Value>) -> Result<BTreeSet<Route>, ProtocolError> {
    match message.get("routes") {
        None | Some(Value::Null) => Err(ProtocolError::MissingField("routes")),
        Some(Value::String(text)) if text == ALL_ROUTES => Ok(Route::ALL.into_iter().collect()),
        Some(Value::String(text)) => Err(ProtocolError::UnknownRoute(text.clone())),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text
                    .parse::<Route>()
                    .map_err(|_parse| ProtocolError::UnknownRoute(text.clone())),
                other => Err(ProtocolError::UnknownRoute(other.to_string())),
            })
            .collect(),
        Some(_) => Err(ProtocolError::InvalidField {
            field: String::from("routes"),
            reason: String::from("expected \"all\" or an array of routes"),
        }),
    }
}

fn decode_query(message: &Map<String, Value>) -> Result<QueryType, ProtocolError> {
    match message.get("queryType") {
        None | Some(Value::Null) => Ok(QueryType::default()),
        Some(Value::String(text)) => text
            .parse()
            .map_err(|_parse| ProtocolError::UnknownQueryType(text.clone())),
        Some(other) => Err(ProtocolError::UnknownQueryType(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Outbound frames
// ---------------------------------------------------------------------------

/// Discriminator of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameKind {
    /// State, acknowledgements, and query replies.
    Status,
    /// Rejection of an inbound frame.
    Error,
}

#[derive(Serialize)]
struct StatusFrame<'a, T> {
    #[serde(rename = "type")]
    kind: FrameKind,
    timestamp: String,
    data: &'a T,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    #[serde(rename = "type")]
    kind: FrameKind,
    timestamp: String,
    error: &'a str,
    error_code: ErrorCode,
}

/// ISO 8601 UTC with millisecond precision, e.g. `2026-01-01T00:00:00.000Z`.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn terminate(mut json: String) -> Frame {
    json.push('\n');
    Frame::from(json)
}

/// Encode a `STATUS` frame carrying `data`.
pub fn encode_status<T: Serialize>(data: &T) -> Result<Frame, EncodeError> {
    let frame = StatusFrame {
        kind: FrameKind::Status,
        timestamp: timestamp(),
        data,
    };
    Ok(terminate(serde_json::to_string(&frame)?))
}

/// Encode an `ERROR` frame.
pub fn encode_error(code: ErrorCode, message: &str) -> Result<Frame, EncodeError> {
    let frame = ErrorFrame {
        kind: FrameKind::Error,
        timestamp: timestamp(),
        error: message,
        error_code: code,
    };
    Ok(terminate(serde_json::to_string(&frame)?))
}

/// Encode the `ERROR` frame reporting a rejected inbound line.
pub fn encode_protocol_error(err: &ProtocolError) -> Result<Frame, EncodeError> {
    encode_error(err.code(), &err.to_string())
}

/// A decoded outbound frame, as a client sees it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerFrame<T> {
    /// `STATUS` or `ERROR`.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// When the server encoded the frame.
    pub timestamp: DateTime<Utc>,
    /// Payload of a `STATUS` frame.
    pub data: Option<T>,
    /// Message of an `ERROR` frame.
    pub error: Option<String>,
    /// Code of an `ERROR` frame.
    pub error_code: Option<ErrorCode>,
}

/// Decode one outbound line on the client side.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<ServerFrame<T>, ProtocolError> {
    serde_json::from_str(line.trim_end()).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<ClientCommand, ProtocolError> {
        decode_command(text.as_bytes())
    }

    #[test]
    fn accumulator_reassembles_split_frames() {
        let mut acc = LineAccumulator::new(1024);
        assert!(acc.push(b"{\"type\":\"QU").is_empty());
        assert_eq!(acc.pending_len(), 11);
        let lines = acc.push(b"ERY\"}\r\n{\"type\"");
        assert_eq!(lines, vec![Ok(b"{\"type\":\"QUERY\"}".to_vec())]);
        assert_eq!(acc.pending_len(), 7);
    }

    #[test]
    fn accumulator_yields_every_line_in_a_chunk() {
        let mut acc = LineAccumulator::new(1024);
        let lines = acc.push(b"one\n\n  \ntwo\nthree\n");
        let lines: Vec<_> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn accumulator_rejects_oversized_fragment_once() {
        let mut acc = LineAccumulator::new(8);
        let first = acc.push(b"0123456789");
        assert_eq!(first, vec![Err(ProtocolError::FrameTooLarge { limit: 8 })]);
        assert!(acc.push(b"more junk").is_empty());
        let after = acc.push(b"tail\nok\n");
        assert_eq!(after, vec![Ok(b"ok".to_vec())]);
    }

    #[test]
    fn accumulator_rejects_oversized_complete_line() {
        let mut acc = LineAccumulator::new(4);
        let lines = acc.push(b"toolong\nfine\n");
        assert_eq!(
            lines,
            vec![Err(ProtocolError::FrameTooLarge { limit: 4 }), Ok(b"fine".to_vec())]
        );
    }

    #[test]
    fn camera_update_parses_and_clamps() {
        let cmd = decode(
            r#"{"type":"CAMERA_UPDATE","data":{"A":{"vehicles":10,"heavyVehicles":2},"C":{"vehicles":-4,"heavyVehicles":"3.9"},"D":{}}}"#,
        )
        .unwrap();
        let expected: BTreeMap<Route, TrafficSample> = [
            (Route::A, TrafficSample::new(10, 2)),
            (Route::C, TrafficSample::new(0, 3)),
            (Route::D, TrafficSample::new(0, 0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(cmd, ClientCommand::CameraUpdate(expected));
    }

    #[test]
    fn camera_update_rejects_whole_message() {
        let bad_route = decode(r#"{"type":"CAMERA_UPDATE","data":{"A":{"vehicles":1},"E":{}}}"#);
        assert_eq!(bad_route.unwrap_err().code(), ErrorCode::InvalidRoute);

        let bad_count = decode(r#"{"type":"CAMERA_UPDATE","data":{"A":{"vehicles":"many"}}}"#);
        assert_eq!(bad_count.unwrap_err().code(), ErrorCode::InvalidField);

        let missing = decode(r#"{"type":"CAMERA_UPDATE"}"#);
        assert_eq!(missing.unwrap_err().code(), ErrorCode::InvalidMessage);

        let not_object = decode(r#"{"type":"CAMERA_UPDATE","data":{"B":7}}"#);
        assert_eq!(not_object.unwrap_err().code(), ErrorCode::InvalidField);
    }

    #[test]
    fn subscribe_all_expands_to_every_route() {
        let cmd = decode(r#"{"type":"SUBSCRIBE","routes":"all"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Subscribe(Route::ALL.into_iter().collect()));
    }

    #[test]
    fn subscribe_list_rejects_any_bad_element() {
        let cmd = decode(r#"{"type":"UNSUBSCRIBE","routes":["A","C","A"]}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Unsubscribe([Route::A, Route::C].into_iter().collect()));

        let err = decode(r#"{"type":"SUBSCRIBE","routes":["A","Z"]}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownRoute(String::from("Z")));
        let err = decode(r#"{"type":"SUBSCRIBE","routes":["A",3]}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRoute);
        let err = decode(r#"{"type":"SUBSCRIBE"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn query_defaults_to_status() {
        assert_eq!(
            decode(r#"{"type":"QUERY"}"#).unwrap(),
            ClientCommand::Query(QueryType::Status)
        );
        assert_eq!(
            decode(r#"{"type":"QUERY","queryType":"traffic"}"#).unwrap(),
            ClientCommand::Query(QueryType::Traffic)
        );
        let err = decode(r#"{"type":"QUERY","queryType":"history"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownQueryType);
    }

    #[test]
    fn envelope_errors_have_specific_codes() {
        assert_eq!(decode("{not json").unwrap_err().code(), ErrorCode::InvalidJson);
        assert_eq!(decode("[1,2]").unwrap_err().code(), ErrorCode::InvalidMessage);
        assert_eq!(decode(r#"{"kind":"QUERY"}"#).unwrap_err().code(), ErrorCode::InvalidMessage);
        assert_eq!(
            decode(r#"{"type":"RESET"}"#).unwrap_err().code(),
            ErrorCode::UnknownMessageType
        );
        assert_eq!(
            decode_command(&[0xff, 0xfe]).unwrap_err().code(),
            ErrorCode::InvalidJson
        );
    }

    #[test]
    fn status_frame_is_one_terminated_line() {
        let frame = encode_status(&serde_json::json!({"event": "ping"})).unwrap();
        assert!(frame.ends_with('\n'));
        assert_eq!(frame.matches('\n').count(), 1);

        let decoded: ServerFrame<Value> = decode_frame(&frame).unwrap();
        assert_eq!(decoded.kind, FrameKind::Status);
        assert_eq!(decoded.data, Some(serde_json::json!({"event": "ping"})));
        assert!(decoded.error_code.is_none());
    }

    #[test]
    fn error_frame_carries_code_and_millisecond_timestamp() {
        let err = ProtocolError::UnknownType(String::from("RESET"));
        let frame = encode_protocol_error(&err).unwrap();
        let raw: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(raw["type"], "ERROR");
        assert_eq!(raw["error_code"], "UNKNOWN_MESSAGE_TYPE");
        let stamp = raw["timestamp"].as_str().unwrap();
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.split('.').nth(1).map(str::len), Some(4));
    }
}
