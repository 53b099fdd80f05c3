//! Normalized error taxonomy.
//!
//! Every failure an operator can see — adapter faults, validation
//! rejections, deadline expiry — is mapped onto one fixed set of kinds.
//! The HTTP layer and the audit log both key off these.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed set of normalized failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRange,
    Busy,
    Unavailable,
    Unauthorized,
    Forbidden,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// Wire code, as carried in error envelopes and audit records.
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRange => "INVALID_RANGE",
            ErrorKind::Busy => "BUSY",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// HTTP status for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidRange => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Busy | ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Short audit outcome for this kind.
    pub fn outcome(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRange
            | ErrorKind::NotFound
            | ErrorKind::Unauthorized
            | ErrorKind::Forbidden => "rejected",
            ErrorKind::Busy | ErrorKind::Unavailable | ErrorKind::Internal => "failed",
        }
    }

    /// Classify a raw vendor error message by substring, in priority
    /// order. Ports that return typed errors never reach this; it is
    /// the fallback for free-text failures and must stay the only
    /// place such matching happens.
    pub fn from_raw_message(message: &str) -> ErrorKind {
        const PRIORITY: [(&str, ErrorKind); 5] = [
            ("INVALID_RANGE", ErrorKind::InvalidRange),
            ("UNAVAILABLE", ErrorKind::Unavailable),
            ("BUSY", ErrorKind::Busy),
            ("UNAUTHORIZED", ErrorKind::Unauthorized),
            ("FORBIDDEN", ErrorKind::Forbidden),
        ];
        for (needle, kind) in PRIORITY {
            if message.contains(needle) {
                return kind;
            }
        }
        ErrorKind::Internal
    }
}

/// A normalized command failure: a kind plus an operator-safe message.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{}: {message}", .kind.as_code())]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(radio_id: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("unknown radio '{radio_id}'"))
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRange, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<crate::adapter::AdapterError> for CommandError {
    fn from(err: crate::adapter::AdapterError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
