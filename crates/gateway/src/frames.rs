//! Wire frames for the gateway WebSocket protocol.
//!
//! Every text frame carries exactly one JSON value: a request from the
//! client, or a response/event from the server.

use krill::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error payload carried in failing response frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        ErrorPayload {
            code: err.kind().code(),
            message: err.message().to_string(),
            detail: err.detail().map(str::to_string),
        }
    }
}

/// One gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Request {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
    Event {
        topic: String,
        data: Value,
        /// Milliseconds since the Unix epoch.
        ts: i64,
    },
}

impl Frame {
    pub fn response_ok(id: impl Into<String>, result: Value) -> Self {
        Frame::Response {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn response_err(id: impl Into<String>, err: &Error) -> Self {
        Frame::Response {
            id: id.into(),
            result: None,
            error: Some(ErrorPayload::from(err)),
        }
    }

    pub fn event(topic: impl Into<String>, data: Value) -> Self {
        Frame::Event {
            topic: topic.into(),
            data,
            ts: krill::timestamp_ms(),
        }
    }
}
