//! Command/reply envelope and its two wire encodings.
//!
//! Wire fields are `msg_type`, `msg_val`, `params` and `timestamp`. The header
//! fields are kept as raw strings so an envelope carrying an unknown `msg_val`
//! still decodes and can be answered with a "not recognized" reply.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::{HdbusError, Result};

/// Recognised `params` keys.
pub mod params {
    pub const DEVICE: &str = "DEVICE";
    pub const CONFIG: &str = "CONFIG";
    pub const PROCESS: &str = "PROCESS";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const RATE: &str = "RATE";
    pub const REPLY: &str = "REPLY";
}

/// Message class (`msg_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    Command,
}

impl MsgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MsgKind::Command => "CMD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CMD" => Some(MsgKind::Command),
            _ => None,
        }
    }
}

/// Requested operation (`msg_val`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Status,
    Read,
    Config,
    Process,
    Notify,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Status,
        Operation::Read,
        Operation::Config,
        Operation::Process,
        Operation::Notify,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Status => "STATUS",
            Operation::Read => "READ",
            Operation::Config => "CONFIG",
            Operation::Process => "PROCESS",
            Operation::Notify => "NOTIFY",
        }
    }

    /// Parse a wire value. Matching is exact, as on the wire.
    pub fn parse(value: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.as_str() == value)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire encoding, selected per envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Textual JSON, keys sorted.
    Json,
    /// Compact map-based CBOR.
    #[default]
    Cbor,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Json => "JSON",
            Encoding::Cbor => "CBOR",
        }
    }
}

impl FromStr for Encoding {
    type Err = HdbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "JSON" => Ok(Encoding::Json),
            "CBOR" => Ok(Encoding::Cbor),
            _ => Err(HdbusError::UnsupportedEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of exchange between requesters and the dispatch server.
///
/// Field declaration order is alphabetical so the JSON form comes out sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg_val: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip)]
    encoding: Encoding,
}

impl Envelope {
    /// Build an envelope stamped with the current local time.
    pub fn new(kind: MsgKind, operation: Operation) -> Self {
        Self::from_parts(kind.as_str(), operation.as_str())
    }

    /// Shorthand for a `CMD` envelope.
    pub fn command(operation: Operation) -> Self {
        Self::new(MsgKind::Command, operation)
    }

    /// Build an envelope from raw header strings. Used for values outside the
    /// known vocabulary.
    pub fn from_parts(msg_type: impl Into<String>, msg_val: impl Into<String>) -> Self {
        Self {
            msg_type: Some(msg_type.into()),
            msg_val: Some(msg_val.into()),
            params: BTreeMap::new(),
            timestamp: Some(now_iso8601()),
            encoding: Encoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.msg_type.as_deref()
    }

    pub fn msg_val(&self) -> Option<&str> {
        self.msg_val.as_deref()
    }

    pub fn kind(&self) -> Option<MsgKind> {
        self.msg_type().and_then(MsgKind::parse)
    }

    /// The operation, or `None` when `msg_val` is absent or outside the
    /// vocabulary.
    pub fn operation(&self) -> Option<Operation> {
        self.msg_val().and_then(Operation::parse)
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Required parameter lookup.
    pub fn param(&self, name: &str) -> Result<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| HdbusError::MissingParam(name.to_string()))
    }

    pub fn param_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.params.get(name).map(String::as_str).unwrap_or(default)
    }

    pub fn opt_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Insert or overwrite a parameter.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.msg_type.is_some() && self.msg_val.is_some() && self.timestamp.is_some()
    }

    /// Serialize with this envelope's encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self.encoding {
            Encoding::Json => serde_json::to_vec(self)
                .map_err(|e| HdbusError::Internal(format!("json encode failed: {e}"))),
            Encoding::Cbor => {
                let mut out = Vec::new();
                ciborium::into_writer(self, &mut out)
                    .map_err(|e| HdbusError::Internal(format!("cbor encode failed: {e}")))?;
                Ok(out)
            }
        }
    }

    /// Parse bytes produced by a peer using `encoding`.
    pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<Self> {
        tracing::trace!(%encoding, len = bytes.len(), "decoding envelope");
        let mut env: Envelope = match encoding {
            Encoding::Json => serde_json::from_slice(bytes)
                .map_err(|e| HdbusError::MalformedEnvelope(format!("illegal JSON: {e}")))?,
            Encoding::Cbor => {
                let mut rest = bytes;
                let env: Envelope = ciborium::from_reader(&mut rest)
                    .map_err(|e| HdbusError::MalformedEnvelope(format!("illegal CBOR: {e}")))?;
                if !rest.is_empty() {
                    return Err(HdbusError::MalformedEnvelope(format!(
                        "illegal CBOR: {} trailing bytes",
                        rest.len()
                    )));
                }
                env
            }
        };
        env.encoding = encoding;
        Ok(env)
    }

    /// Like [`Envelope::decode`] with the encoding given by name.
    pub fn decode_named(bytes: &[u8], encoding: &str) -> Result<Self> {
        let encoding = encoding
            .parse::<Encoding>()
            .map_err(|e| HdbusError::MalformedEnvelope(e.to_string()))?;
        Self::decode(bytes, encoding)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

fn now_iso8601() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_envelope_is_valid_with_empty_params() {
        let env = Envelope::command(Operation::Status);
        assert!(env.is_valid());
        assert!(env.params().is_empty());
        assert_eq!(env.kind(), Some(MsgKind::Command));
        assert_eq!(env.operation(), Some(Operation::Status));
    }

    #[test]
    fn unknown_msg_val_has_no_operation() {
        let env = Envelope::from_parts("CMD", "BOGUS");
        assert!(env.is_valid());
        assert_eq!(env.operation(), None);
        assert_eq!(env.msg_val(), Some("BOGUS"));
    }

    #[test]
    fn set_param_overwrites() {
        let mut env = Envelope::command(Operation::Config);
        env.set_param(params::CONFIG, "ON");
        env.set_param(params::CONFIG, "OFF");
        assert_eq!(env.param(params::CONFIG).ok(), Some("OFF"));
        assert_eq!(env.params().len(), 1);
    }

    #[test]
    fn missing_param_errors_unless_defaulted() {
        let env = Envelope::command(Operation::Read);
        assert!(matches!(
            env.param(params::DEVICE),
            Err(HdbusError::MissingParam(name)) if name == "DEVICE"
        ));
        assert_eq!(env.param_or(params::RATE, "1"), "1");
    }

    #[test]
    fn json_form_is_sorted() {
        let env = Envelope::command(Operation::Config)
            .with_encoding(Encoding::Json)
            .with_param(params::DEVICE, "LED_RED")
            .with_param(params::CONFIG, "ON");
        let text = String::from_utf8(env.encode().unwrap()).unwrap();
        let msg_type = text.find("\"msg_type\"").unwrap();
        let msg_val = text.find("\"msg_val\"").unwrap();
        let params = text.find("\"params\"").unwrap();
        let timestamp = text.find("\"timestamp\"").unwrap();
        assert!(msg_type < msg_val && msg_val < params && params < timestamp);
        assert!(text.find("\"CONFIG\"") < text.find("\"DEVICE\""));
    }

    #[test]
    fn encoding_names_are_case_insensitive() {
        assert_eq!("json".parse::<Encoding>().ok(), Some(Encoding::Json));
        assert_eq!("CBOR".parse::<Encoding>().ok(), Some(Encoding::Cbor));
        assert!(matches!(
            "wibble".parse::<Encoding>(),
            Err(HdbusError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn decode_named_rejects_unknown_encoding_as_malformed() {
        let err = Envelope::decode_named(b"{}", "msgpack").unwrap_err();
        assert!(matches!(err, HdbusError::MalformedEnvelope(_)));
    }

    #[test]
    fn garbage_is_malformed_under_both_encodings() {
        for enc in [Encoding::Json, Encoding::Cbor] {
            let err = Envelope::decode(&[0xff, 0x00, 0x13], enc).unwrap_err();
            assert!(matches!(err, HdbusError::MalformedEnvelope(_)), "{enc}");
        }
    }

    #[test]
    fn trailing_bytes_are_malformed_under_both_encodings() {
        let env = Envelope::command(Operation::Status).with_param(params::DEVICE, "TEMP");
        for enc in [Encoding::Json, Encoding::Cbor] {
            let mut bytes = env.clone().with_encoding(enc).encode().unwrap();
            assert!(Envelope::decode(&bytes, enc).is_ok(), "{enc}");
            bytes.extend_from_slice(&[0x00, 0x2a]);
            let err = Envelope::decode(&bytes, enc).unwrap_err();
            assert!(matches!(err, HdbusError::MalformedEnvelope(_)), "{enc}");
        }
    }

    #[test]
    fn empty_object_decodes_but_is_not_valid() {
        let env = Envelope::decode(b"{}", Encoding::Json).unwrap();
        assert!(!env.is_valid());
    }
}
