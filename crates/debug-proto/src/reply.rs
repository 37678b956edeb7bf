use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Address, ExitReason, Watchpoint};
use crate::ProtoError;

/// Raw response object as it appears on the wire. The server answers with
/// `{"success": true}`, `{"data": ...}` or `{"message": ...}`; absence of both
/// `data` and `success` means failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Normalised response: exactly one of unit success, data payload, failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResponseEnvelope", into = "ResponseEnvelope")]
pub enum DebugReply {
    Unit,
    Data(Value),
    Failure(String),
}

impl DebugReply {
    pub fn data<T: Serialize>(payload: T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => DebugReply::Data(value),
            Err(err) => DebugReply::Failure(format!("failed to encode reply: {err}")),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        DebugReply::Failure(message.into())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DebugReply::Failure(_))
    }

    /// Decode a `Data` payload. `command` names the request for error context.
    pub fn decode<T: DeserializeOwned>(
        self,
        command: &'static str,
    ) -> Result<Result<T, String>, ProtoError> {
        match self {
            DebugReply::Data(value) => serde_json::from_value(value)
                .map(Ok)
                .map_err(|source| ProtoError::MalformedPayload { command, source }),
            DebugReply::Unit => serde_json::from_value(Value::Null)
                .map(Ok)
                .map_err(|source| ProtoError::MalformedPayload { command, source }),
            DebugReply::Failure(message) => Ok(Err(message)),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl From<ResponseEnvelope> for DebugReply {
    fn from(envelope: ResponseEnvelope) -> Self {
        match envelope {
            ResponseEnvelope {
                data: Some(data), ..
            } => DebugReply::Data(data),
            ResponseEnvelope {
                success: Some(true),
                ..
            } => DebugReply::Unit,
            ResponseEnvelope {
                message: Some(message),
                ..
            } => DebugReply::Failure(message),
            _ => DebugReply::Failure("response carried neither data nor success".into()),
        }
    }
}

impl From<DebugReply> for ResponseEnvelope {
    fn from(reply: DebugReply) -> Self {
        match reply {
            DebugReply::Unit => ResponseEnvelope {
                success: Some(true),
                ..Default::default()
            },
            DebugReply::Data(value) => ResponseEnvelope {
                data: Some(value),
                ..Default::default()
            },
            DebugReply::Failure(message) => ResponseEnvelope {
                message: Some(message),
                ..Default::default()
            },
        }
    }
}

/// `{"Ok": ...}` / `{"Err": "..."}` envelope used by the session start and
/// stop endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiResult<T> {
    Ok(T),
    Err(String),
}

impl<T> ApiResult<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            ApiResult::Ok(value) => Ok(value),
            ApiResult::Err(message) => Err(message),
        }
    }
}

impl<T> From<Result<T, String>> for ApiResult<T> {
    fn from(result: Result<T, String>) -> Self {
        match result {
            Ok(value) => ApiResult::Ok(value),
            Err(message) => ApiResult::Err(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPayload {
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub pc: Address,
    pub icount: u64,
    /// Absent when the server does not track divergence itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diverged: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointList {
    pub breakpoints: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchpointList {
    pub watchpoints: Vec<Watchpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterValue {
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    pub registers: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disassembly {
    pub disassembly: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backtrace {
    pub backtrace: Vec<Address>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalises_the_three_wire_shapes() {
        assert_eq!(
            DebugReply::from_json(r#"{"success":true}"#).unwrap(),
            DebugReply::Unit
        );
        assert_eq!(
            DebugReply::from_json(r#"{"data":{"pc":4,"icount":0}}"#).unwrap(),
            DebugReply::Data(json!({ "pc": 4, "icount": 0 }))
        );
        assert_eq!(
            DebugReply::from_json(r#"{"message":"unknown register: r99"}"#).unwrap(),
            DebugReply::Failure("unknown register: r99".into())
        );
    }

    #[test]
    fn missing_data_and_success_is_a_failure() {
        let reply = DebugReply::from_json(r#"{"success":false}"#).unwrap();
        assert!(reply.is_failure());
        let reply = DebugReply::from_json("{}").unwrap();
        assert!(reply.is_failure());
    }

    #[test]
    fn encodes_replies_in_wire_shape() {
        assert_eq!(DebugReply::Unit.to_json().unwrap(), r#"{"success":true}"#);
        assert_eq!(
            DebugReply::failure("nope").to_json().unwrap(),
            r#"{"message":"nope"}"#
        );
        let reply = DebugReply::data(ExitPayload {
            exit_reason: ExitReason::WriteWatch,
        });
        assert_eq!(
            reply.to_json().unwrap(),
            r#"{"data":{"exit_reason":"write_watch"}}"#
        );
    }

    #[test]
    fn decode_reports_malformed_payloads() {
        let reply = DebugReply::Data(json!({ "pc": "not a number" }));
        let err = reply.decode::<CursorState>("state").unwrap_err();
        assert!(matches!(err, ProtoError::MalformedPayload { command: "state", .. }));
    }

    #[test]
    fn cursor_state_divergence_is_optional() {
        let state: CursorState = serde_json::from_value(json!({ "pc": 16, "icount": 3 })).unwrap();
        assert_eq!(state.diverged, None);
        let state: CursorState =
            serde_json::from_value(json!({ "pc": 16, "icount": 3, "diverged": true })).unwrap();
        assert_eq!(state.diverged, Some(true));
    }

    #[test]
    fn api_result_matches_ok_err_objects() {
        let ok: ApiResult<()> = serde_json::from_str(r#"{"Ok":null}"#).unwrap();
        assert_eq!(ok, ApiResult::Ok(()));
        let err: ApiResult<()> = serde_json::from_str(r#"{"Err":"testcase not found: x"}"#).unwrap();
        assert_eq!(err.into_result(), Err("testcase not found: x".to_string()));
    }
}
