//! Request/response envelopes exchanged between service endpoints.
//!
//! Every message carries `id`, `type` (`request` or `response`) and
//! `endpoint` (the reply-to address). Field names are camelCase on the wire,
//! except `requestID` which keeps its historical spelling.

use serde::{Deserialize, Serialize};

use crate::result::RemoteResult;
use crate::types::{Value, ValueKind};

/// Correlation id, unique and increasing per sending endpoint.
pub type MessageId = u64;

/// A wire message, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Invocation of `op_name` on a provider of `service_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: MessageId,
    /// Reply-to endpoint of the caller.
    pub endpoint: String,
    pub service_type: String,
    pub op_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Answer to the request whose id is `request_id`.
///
/// An absent `return_type` means the operation completed with no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: MessageId,
    pub endpoint: String,
    #[serde(rename = "requestID")]
    pub request_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ValueKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
}

impl Response {
    /// Builds a response, deriving the return-type tag from `value`.
    #[must_use]
    pub fn new(
        id: MessageId,
        request_id: MessageId,
        endpoint: impl Into<String>,
        value: Option<Value>,
    ) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            request_id,
            return_type: value.as_ref().map(Value::kind),
            return_value: value,
        }
    }

    /// Converts the response payload into the caller-visible result.
    #[must_use]
    pub fn into_result(self) -> RemoteResult {
        match (self.return_type, self.return_value) {
            (Some(_), Some(value)) => RemoteResult::Value(value),
            _ => RemoteResult::Void,
        }
    }
}

/// Errors from encoding or decoding wire text.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Message {
    #[must_use]
    pub fn id(&self) -> MessageId {
        match self {
            Self::Request(r) => r.id,
            Self::Response(r) => r.id,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Request(r) => &r.endpoint,
            Self::Response(r) => &r.endpoint,
        }
    }

    /// Encodes the message as wire text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if serialization fails.
    pub fn to_text(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes wire text into a message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the text is not a valid message.
    pub fn from_text(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}
