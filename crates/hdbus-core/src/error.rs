//! Shared error type across hdbus crates.

use thiserror::Error;

/// Reply-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    /// Undecodable request bytes.
    Malformed,
    /// A required envelope parameter was missing.
    Internal,
    /// Alias or address could not be resolved.
    NoSuchDevice,
    /// The device lacks the requested capability.
    Unsupported,
    /// Config value, parameter or process command rejected.
    Invalid,
}

impl ReplyCode {
    /// String representation used in metrics labels and NACK replies.
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyCode::Malformed => "MALFORMED",
            ReplyCode::Internal => "INTERNAL",
            ReplyCode::NoSuchDevice => "NO_SUCH_DEVICE",
            ReplyCode::Unsupported => "UNSUPPORTED",
            ReplyCode::Invalid => "INVALID",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, HdbusError>;

/// Unified error type used by core, server and client.
#[derive(Debug, Error)]
pub enum HdbusError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("encoding format {0} not recognised or supported")]
    UnsupportedEncoding(String),
    #[error("missing parameter {0}")]
    MissingParam(String),
    #[error("no such device: {0}")]
    UnknownAlias(String),
    #[error("no address assigned to {0}")]
    AddressNotFound(String),
    #[error("{operation} is not supported by {alias}")]
    UnsupportedOperation { alias: String, operation: String },
    #[error("invalid config {value} for {alias}, expected one of {expected}")]
    InvalidConfig {
        alias: String,
        value: String,
        expected: String,
    },
    #[error("invalid {name} parameter: {value}")]
    InvalidParam { name: String, value: String },
    #[error("Process type {0} not recognized")]
    InvalidProcessCommand(String),
    #[error("address pool exhausted, unaddressed devices: {}", .0.join(", "))]
    AddressPoolExhausted(Vec<String>),
    #[error("config: {0}")]
    Config(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl HdbusError {
    /// Map an error to a stable reply code.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            HdbusError::MalformedEnvelope(_) | HdbusError::UnsupportedEncoding(_) => {
                ReplyCode::Malformed
            }
            HdbusError::UnknownAlias(_) | HdbusError::AddressNotFound(_) => {
                ReplyCode::NoSuchDevice
            }
            HdbusError::UnsupportedOperation { .. } => ReplyCode::Unsupported,
            HdbusError::InvalidConfig { .. }
            | HdbusError::InvalidParam { .. }
            | HdbusError::InvalidProcessCommand(_) => ReplyCode::Invalid,
            HdbusError::MissingParam(_)
            | HdbusError::AddressPoolExhausted(_)
            | HdbusError::Config(_)
            | HdbusError::Transport(_)
            | HdbusError::Internal(_) => ReplyCode::Internal,
        }
    }

    /// Human-readable text placed in a reply envelope for this error.
    ///
    /// Missing fields collapse to "Internal Error" so the requester always gets
    /// some reply for a syntactically valid envelope; device-level errors are
    /// surfaced verbatim.
    pub fn reply_text(&self) -> String {
        match self {
            HdbusError::MissingParam(_) => format!("Internal Error: {self}"),
            HdbusError::UnknownAlias(alias) | HdbusError::AddressNotFound(alias) => {
                format!("No such device: {alias}")
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_param_is_an_internal_error_reply() {
        let e = HdbusError::MissingParam("DEVICE".into());
        assert_eq!(e.reply_code(), ReplyCode::Internal);
        assert_eq!(e.reply_text(), "Internal Error: missing parameter DEVICE");
    }

    #[test]
    fn unaddressed_and_unknown_read_the_same_to_requesters() {
        let a = HdbusError::UnknownAlias("FAN".into()).reply_text();
        let b = HdbusError::AddressNotFound("FAN".into()).reply_text();
        assert_eq!(a, b);
    }

    #[test]
    fn device_errors_are_verbatim() {
        let e = HdbusError::UnsupportedOperation {
            alias: "TEMP".into(),
            operation: "PROCESS BLINK".into(),
        };
        assert_eq!(e.reply_text(), "PROCESS BLINK is not supported by TEMP");
        assert_eq!(e.reply_code().as_str(), "UNSUPPORTED");
    }
}
