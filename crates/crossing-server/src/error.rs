//! Error types for the protocol server.
//!
//! [`ProtocolError`] covers every way an inbound frame can be rejected and
//! maps each case onto a stable [`ErrorCode`] that is sent to the client in
//! an `ERROR` frame. None of these errors closes the connection.

use serde::{Deserialize, Serialize};

/// Stable machine-readable code carried in the `error_code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Generic rejection; the default when nothing more specific applies.
    InvalidMessage,
    /// The frame is not valid UTF-8 JSON.
    InvalidJson,
    /// The `type` discriminator names no known message.
    UnknownMessageType,
    /// A route identifier outside `A`-`D`.
    InvalidRoute,
    /// A field is present but has the wrong shape.
    InvalidField,
    /// `queryType` names no known view.
    UnknownQueryType,
    /// A frame exceeded the configured size limit.
    FrameTooLarge,
    /// The server is at its session limit.
    ServerFull,
}

impl ErrorCode {
    /// The code as it appears on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::InvalidJson => "INVALID_JSON",
            Self::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            Self::InvalidRoute => "INVALID_ROUTE",
            Self::InvalidField => "INVALID_FIELD",
            Self::UnknownQueryType => "UNKNOWN_QUERY_TYPE",
            Self::FrameTooLarge => "FRAME_TOO_LARGE",
            Self::ServerFull => "SERVER_FULL",
        }
    }
}

/// Reasons an inbound frame is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame bytes are not UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// The frame is not parseable JSON.
    #[error("malformed JSON: {0}")]
    InvalidJson(String),

    /// The frame is JSON but not an object.
    #[error("message must be a JSON object")]
    NotAnObject,

    /// The `type` discriminator is missing or not a string.
    #[error("missing or non-string 'type' field")]
    MissingType,

    /// The `type` discriminator names no known message.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A required field is absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but malformed.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A route identifier outside `A`-`D`.
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    /// `queryType` names no known view.
    #[error("unknown query type: {0}")]
    UnknownQueryType(String),

    /// A frame grew past the size limit before its newline arrived.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// The configured limit.
        limit: usize,
    },
}

impl ProtocolError {
    /// The wire code for this rejection.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUtf8 | Self::InvalidJson(_) => ErrorCode::InvalidJson,
            Self::NotAnObject | Self::MissingType | Self::MissingField(_) => {
                ErrorCode::InvalidMessage
            }
            Self::UnknownType(_) => ErrorCode::UnknownMessageType,
            Self::InvalidField { .. } => ErrorCode::InvalidField,
            Self::UnknownRoute(_) => ErrorCode::InvalidRoute,
            Self::UnknownQueryType(_) => ErrorCode::UnknownQueryType,
            Self::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,
        }
    }
}

/// Failure to serialize an outbound frame.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode frame: {source}")]
pub struct EncodeError {
    /// The underlying serialization error.
    #[from]
    pub source: serde_json::Error,
}

/// Errors from session registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The session limit has been reached.
    #[error("server is at capacity ({limit} sessions)")]
    Full {
        /// The configured session limit.
        limit: usize,
    },

    /// No session with this id is registered.
    #[error("unknown session: {0}")]
    UnknownSession(crossing_types::SessionId),
}

impl RegistryError {
    /// The wire code for this failure.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Full { .. } => ErrorCode::ServerFull,
            Self::UnknownSession(_) => ErrorCode::InvalidMessage,
        }
    }
}

/// Errors that can occur when starting or running the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The listener failed in a way that cannot be retried.
    #[error("serve error: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_names() {
        for code in [
            ErrorCode::InvalidMessage,
            ErrorCode::InvalidJson,
            ErrorCode::UnknownMessageType,
            ErrorCode::InvalidRoute,
            ErrorCode::InvalidField,
            ErrorCode::UnknownQueryType,
            ErrorCode::FrameTooLarge,
            ErrorCode::ServerFull,
        ] {
            let json = serde_json::to_value(code).ok();
            assert_eq!(json, Some(serde_json::Value::from(code.as_str())));
        }
    }

    #[test]
    fn protocol_errors_map_to_codes() {
        assert_eq!(ProtocolError::MissingType.code(), ErrorCode::InvalidMessage);
        assert_eq!(
            ProtocolError::UnknownRoute(String::from("E")).code(),
            ErrorCode::InvalidRoute
        );
        assert_eq!(
            ProtocolError::InvalidJson(String::new()).code(),
            ErrorCode::InvalidJson
        );
    }
}
