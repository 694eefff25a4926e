use serde::Deserialize;

use crate::value::Value;

/// Transport method of an inbound call.
pub use http::Method;

/// Caller-supplied statement and its positional parameters.
///
/// `query`/`params` are the field names older clients send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "commandText", alias = "query")]
    pub command_text: String,
    #[serde(default, alias = "params")]
    pub parameters: Vec<Value>,
}

impl QueryRequest {
    pub fn new(command_text: &str) -> Self {
        Self {
            command_text: command_text.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn with_param(mut self, value: impl Into<Value>) -> Self {
        self.parameters.push(value.into());
        self
    }

    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}
