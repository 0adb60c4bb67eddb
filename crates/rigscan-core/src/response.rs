//! Decoded miner API reply

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A management-API reply after lenient decoding.
///
/// Firmware occasionally sends bodies that are not valid JSON; those are kept
/// as text so callers can still log or repair them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawResponse {
    Structured(Value),
    Text(String),
}

impl RawResponse {
    /// The structured body, if the reply decoded as JSON
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn into_structured(self) -> Option<Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }
}

impl std::fmt::Display for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured(value) => write!(f, "{}", value),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<Value> for RawResponse {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}
