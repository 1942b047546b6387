//! Error types for modnet
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI
//!
//! Allocation denial is a negotiated outcome and never surfaces here.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for modnet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Transport errors (3xx)
    SendFailed = 300,
    UnknownDestination = 301,
    ChannelClosed = 302,

    // Protocol errors (4xx)
    ProtocolVersion = 400,
    UnexpectedPayload = 401,
    DuplicateReply = 402,
    MissingReply = 403,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────

    /// The transport could not hand the message over
    #[error("Failed to send {message_type} to {destination}: {message}")]
    SendFailed {
        destination: String,
        message_type: String,
        message: String,
    },

    /// Nobody is listening on the destination
    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    /// An internal channel was closed underneath us
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersion { expected: String, actual: String },

    /// A payload of the wrong type arrived
    #[error("Unexpected payload: expected {expected}, got {actual}")]
    UnexpectedPayload { expected: String, actual: String },

    /// A second, distinct reply arrived for a single-reply request
    #[error("A second reply was received for request {request_id}: {reply}")]
    DuplicateReply { request_id: String, reply: String },

    /// The exchange completed without any reply
    #[error("Request {request_id} completed without a reply")]
    MissingReply { request_id: String },

    /// The transport reported a failure for the exchange
    #[error("There was a problem with request {request_id}: {reason}")]
    ReplyFailed { request_id: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::SendFailed { .. } => ErrorCode::SendFailed,
            Error::UnknownDestination(_) => ErrorCode::UnknownDestination,
            Error::ChannelClosed(_) => ErrorCode::ChannelClosed,

            Error::ProtocolVersion { .. } => ErrorCode::ProtocolVersion,
            Error::UnexpectedPayload { .. } => ErrorCode::UnexpectedPayload,
            Error::DuplicateReply { .. } => ErrorCode::DuplicateReply,
            Error::MissingReply { .. } => ErrorCode::MissingReply,
            Error::ReplyFailed { .. } => ErrorCode::SendFailed,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SendFailed { .. }
                | Error::UnknownDestination(_)
                | Error::ReplyFailed { .. }
                | Error::MissingReply { .. }
                | Error::Io(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'modnet config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'modnet config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::UnknownDestination(_) => Some(
                "The target module may not be running yet. Check the registry for live modules."
            ),
            Error::ProtocolVersion { .. } => Some(
                "All modules in a deployment must speak the same major protocol version."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a send failure error
    pub fn send_failed(
        destination: impl Into<String>,
        message_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::SendFailed {
            destination: destination.into(),
            message_type: message_type.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::SendFailed.as_str(), "E300");
        assert_eq!(ErrorCode::DuplicateReply.as_str(), "E402");
        assert_eq!(ErrorCode::InternalError.as_str(), "E900");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigValidation.exit_code(), 10);
        assert_eq!(ErrorCode::IoRead.exit_code(), 20);
        assert_eq!(ErrorCode::ChannelClosed.exit_code(), 30);
        assert_eq!(ErrorCode::MissingReply.exit_code(), 40);
        assert_eq!(ErrorCode::InternalError.exit_code(), 90);
    }

    #[test]
    fn test_error_codes() {
        let err = Error::config_field_invalid("registry.timeout_ms", "required");
        assert_eq!(err.code(), ErrorCode::ConfigValidation);

        let err = Error::send_failed("queue://tutor", "ALLOCATION_REQUEST", "closed");
        assert_eq!(err.code(), ErrorCode::SendFailed);
        assert!(err.to_string().contains("queue://tutor"));

        let err = Error::DuplicateReply {
            request_id: "abc".into(),
            reply: "second".into(),
        };
        assert_eq!(err.code(), ErrorCode::DuplicateReply);
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::send_failed("d", "STATUS", "x").is_retryable());
        assert!(Error::UnknownDestination("d".into()).is_retryable());
        assert!(!Error::config_validation("bad").is_retryable());
        assert!(!Error::DuplicateReply { request_id: "a".into(), reply: "b".into() }.is_retryable());
    }

    #[test]
    fn test_format_for_terminal() {
        let err = Error::ConfigNotFound { path: PathBuf::from("/test/modnet.toml") };
        let formatted = err.format_for_terminal();

        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("Hint"));
    }

    #[test]
    fn test_format_for_log() {
        let err = Error::ConfigNotFound { path: PathBuf::from("/test/modnet.toml") };
        let formatted = err.format_for_log();

        assert!(formatted.contains("[E100]"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }
}
