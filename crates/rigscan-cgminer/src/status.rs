//! STATUS section handling
//!
//! Every structured reply carries `"STATUS": [{"STATUS": "S", "Code": 11,
//! "Msg": "..."}]`. The single-letter code decides whether the body is
//! usable.

use rigscan_core::fields::{to_i64, Block};
use rigscan_core::RawResponse;
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCode {
    Info,
    Success,
    Warning,
    Error,
    Fatal,
    Other(String),
}

impl StatusCode {
    pub fn from_wire(code: &str) -> Self {
        match code {
            "I" => Self::Info,
            "S" => Self::Success,
            "W" => Self::Warning,
            "E" => Self::Error,
            "F" => Self::Fatal,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Info | Self::Success)
    }
}

/// First entry of a reply's STATUS list
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub code: StatusCode,
    /// Numeric `Code` field, 0 when absent
    pub number: i64,
    pub message: String,
    /// Miner clock at reply time, unix seconds
    pub when: Option<i64>,
}

impl StatusEntry {
    pub fn from_response(response: &Value) -> Option<Self> {
        let entry: &Block = response.get("STATUS")?.as_array()?.first()?.as_object()?;
        let code = entry.get("STATUS")?.as_str()?;
        Some(Self {
            code: StatusCode::from_wire(code),
            number: entry.get("Code").and_then(to_i64).unwrap_or(0),
            message: entry
                .get("Msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            when: entry.get("When").and_then(to_i64),
        })
    }
}

/// A W/E/F reply, carried with the full body for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFailure {
    pub code: i64,
    pub message: String,
    pub response: Value,
}

impl std::fmt::Display for StatusFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Accept I/S replies and turn everything else into a [`ProtocolError`]
pub fn check_status(response: RawResponse) -> Result<Value, ProtocolError> {
    let value = match response {
        RawResponse::Structured(value) => value,
        text @ RawResponse::Text(_) => return Err(ProtocolError::Unknown(Box::new(text))),
    };
    let Some(entry) = StatusEntry::from_response(&value) else {
        return Err(ProtocolError::Unknown(Box::new(RawResponse::Structured(value))));
    };
    let failure = |value: Value| StatusFailure {
        code: entry.number,
        message: entry.message.clone(),
        response: value,
    };
    match entry.code {
        StatusCode::Info | StatusCode::Success => Ok(value),
        StatusCode::Warning => Err(ProtocolError::Warning(failure(value))),
        StatusCode::Error => Err(ProtocolError::Rejected(failure(value))),
        StatusCode::Fatal => Err(ProtocolError::Fatal(failure(value))),
        StatusCode::Other(_) => Err(ProtocolError::Unknown(Box::new(RawResponse::Structured(
            value,
        )))),
    }
}
