use serde::{Deserialize, Serialize};
use std::fmt;

/// Classifies every error the gateway can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unknown,
    InvalidConfig,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Unauthorized,
    Forbidden,
    Timeout,
    ConnectionFailed,
    ConnectionClosed,
    ProtocolError,
    SerializationError,
    Io,
    Database,
    Provider,
    Channel,
    Plugin,
    Browser,
    Memory,
    Session,
    RateLimited,
    Internal,
}

impl ErrorKind {
    /// Numeric code carried in response frames.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Unknown => 1,
            ErrorKind::InvalidConfig => 2,
            ErrorKind::InvalidArgument => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::AlreadyExists => 5,
            ErrorKind::Unauthorized => 6,
            ErrorKind::Forbidden => 7,
            ErrorKind::Timeout => 8,
            ErrorKind::ConnectionFailed => 9,
            ErrorKind::ConnectionClosed => 10,
            ErrorKind::ProtocolError => 11,
            ErrorKind::SerializationError => 12,
            ErrorKind::Io => 13,
            ErrorKind::Database => 14,
            ErrorKind::Provider => 15,
            ErrorKind::Channel => 16,
            ErrorKind::Plugin => 17,
            ErrorKind::Browser => 18,
            ErrorKind::Memory => 19,
            ErrorKind::Session => 20,
            ErrorKind::RateLimited => 21,
            ErrorKind::Internal => 22,
        }
    }
}

/// The error value returned by every fallible operation in the gateway.
///
/// Carries a kind, a short human-readable message, and an optional detail
/// string with context (paths, addresses, wrapped error text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(
        kind: ErrorKind,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Error {
            kind,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// User-visible rendering: `"<message>"`, or `"<message>: <detail>"`
    /// when a detail is present.
    pub fn what(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.message, detail),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.message, detail),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_detail(
            ErrorKind::SerializationError,
            "JSON error",
            format!("{} at line {} column {}", err, err.line(), err.column()),
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_detail(ErrorKind::Io, "I/O error", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn what_without_detail_is_message() {
        let e = Error::new(ErrorKind::NotFound, "Method not found");
        assert_eq!(e.what(), "Method not found");
        assert_eq!(e.to_string(), "Method not found");
    }

    #[test]
    fn what_with_detail_appends_detail() {
        let e = Error::with_detail(ErrorKind::Forbidden, "Path escapes workspace", "/etc/passwd");
        assert_eq!(e.what(), "Path escapes workspace: /etc/passwd");
    }

    #[test]
    fn kinds_have_distinct_codes() {
        use std::collections::HashSet;
        let kinds = [
            ErrorKind::Unknown,
            ErrorKind::NotFound,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::Timeout,
            ErrorKind::ConnectionFailed,
            ErrorKind::ConnectionClosed,
            ErrorKind::ProtocolError,
            ErrorKind::Browser,
            ErrorKind::RateLimited,
            ErrorKind::Internal,
        ];
        let codes: HashSet<i32> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }
}
