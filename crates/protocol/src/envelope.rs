//! Envelopes exchanged with the external control process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;

/// Request id reserved for unsolicited updates. Never a reply to a request.
pub const UPDATE_REQUEST_ID: i64 = -1;

/// A request from the external process.
///
/// The `requestId` is caller-chosen and echoed verbatim on the response. The
/// older `messageNum`/`message` field names are accepted on input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
	#[serde(rename = "requestId", alias = "messageNum")]
	pub request_id: i64,
	#[serde(alias = "message", default)]
	pub payload: Value,
}

impl RequestEnvelope {
	pub fn new(request_id: i64, payload: Value) -> Self {
		Self {
			request_id,
			payload,
		}
	}

	/// Decodes the payload into a [`Command`].
	pub fn command(&self) -> Command {
		Command::from_value(&self.payload)
	}
}

/// Structured failure carried in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
	/// Error kind (e.g. `"RoutingError"`, `"ContextLostError"`, `"TypeError"`).
	pub name: String,
	/// Human-readable message.
	pub message: String,
	/// Stack trace, when the failing side produced one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

impl ErrorInfo {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			message: message.into(),
			stack: None,
		}
	}
}

/// Outcome half of a [`ResponseEnvelope`].
///
/// `error` is serialized as `null` on success rather than omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
	#[serde(default)]
	pub value: Value,
	#[serde(default)]
	pub error: Option<ErrorInfo>,
}

/// A reply (or unsolicited update) sent to the external process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
	#[serde(rename = "requestId")]
	pub request_id: i64,
	pub result: CommandResult,
}

impl ResponseEnvelope {
	pub fn success(request_id: i64, value: Value) -> Self {
		Self {
			request_id,
			result: CommandResult { value, error: None },
		}
	}

	pub fn failure(request_id: i64, error: ErrorInfo) -> Self {
		Self {
			request_id,
			result: CommandResult {
				value: Value::Null,
				error: Some(error),
			},
		}
	}

	/// Wraps an unsolicited context event.
	pub fn update(data: Value) -> Self {
		Self::success(UPDATE_REQUEST_ID, data)
	}

	pub fn is_update(&self) -> bool {
		self.request_id == UPDATE_REQUEST_ID
	}

	pub fn is_error(&self) -> bool {
		self.result.error.is_some()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn request_accepts_legacy_field_names() {
		let request: RequestEnvelope =
			serde_json::from_value(json!({"messageNum": 7, "message": {"type": "a.b.QueryTime"}})).unwrap();
		assert_eq!(request.request_id, 7);
		assert_eq!(request.command(), Command::QueryTime);
	}

	#[test]
	fn success_serializes_explicit_null_error() {
		let response = ResponseEnvelope::success(3, json!("pong"));
		let value = serde_json::to_value(&response).unwrap();
		assert_eq!(value, json!({"requestId": 3, "result": {"value": "pong", "error": null}}));
	}

	#[test]
	fn failure_carries_error_info() {
		let mut info = ErrorInfo::new("LocalFault", "boom");
		info.stack = Some("at router".into());
		let value = serde_json::to_value(ResponseEnvelope::failure(9, info)).unwrap();
		assert_eq!(value["requestId"], 9);
		assert_eq!(value["result"]["value"], Value::Null);
		assert_eq!(value["result"]["error"]["name"], "LocalFault");
		assert_eq!(value["result"]["error"]["stack"], "at router");
	}

	#[test]
	fn updates_use_reserved_id() {
		let update = ResponseEnvelope::update(json!({"status": "PLAYING"}));
		assert!(update.is_update());
		assert!(!update.is_error());
		assert_eq!(update.request_id, UPDATE_REQUEST_ID);
	}
}
