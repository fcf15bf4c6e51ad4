use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed envelope of one relayed JSON message.
///
/// The relay only needs the outer routing fields: `command` names a request
/// that may be answered locally, `rid` correlates a response with its
/// request, `code`/`data` appear on responses. Everything else is captured in
/// the flattened `extra` map so a message round-trips losslessly through
/// parse-and-reserialize. Payload shapes below these fields are deliberately
/// opaque to the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Command name on client-originated requests; absent on pure responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Opaque request correlation token, echoed back in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    /// Response status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// All remaining fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RelayMessage {
    /// Parse a text frame into a message envelope.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize the envelope back to a single-line JSON string.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Convenience lookup into `data` by a path of object keys.
    ///
    /// Returns `None` if any segment is missing or not an object.
    pub fn data_path(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self.data.as_ref()?;
        for key in path {
            current = current.get(key)?;
        }
        Some(current)
    }
}
