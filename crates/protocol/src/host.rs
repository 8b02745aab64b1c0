//! Messages exchanged with the host agent.
//!
//! The host agent runs inside the browser (the extension background) and owns
//! the capabilities the router cannot perform itself: enumerating, creating,
//! navigating and closing contexts. The exchange is:
//!
//! 1. Router sends a [`HostCommand`] wrapped with a request `id`
//! 2. Agent answers with a [`HostResponse`] carrying the same `id`
//! 3. Independently, the agent pushes [`HostEvent`]s as contexts settle or close

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextId;
use crate::envelope::ErrorInfo;

/// Request from the router to the host agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum HostCommand {
	/// List contexts whose URL matches a WebExtension match pattern.
	QueryContexts { pattern: String },
	/// Describe one context.
	GetContext {
		#[serde(rename = "contextId")]
		context_id: ContextId,
	},
	/// Open a context on `url`. Muted contexts are disposable.
	CreateContext { url: String, muted: bool },
	/// Point an existing context at `url`.
	Navigate {
		#[serde(rename = "contextId")]
		context_id: ContextId,
		url: String,
	},
	CloseContext {
		#[serde(rename = "contextId")]
		context_id: ContextId,
	},
}

impl HostCommand {
	/// Builds the wire request `{ id, method, params }`.
	pub fn to_request(&self, id: u64) -> serde_json::Result<Value> {
		let mut value = serde_json::to_value(self)?;
		if let Some(fields) = value.as_object_mut() {
			fields.insert("id".to_string(), Value::from(id));
		}
		Ok(value)
	}

	pub fn method(&self) -> &'static str {
		match self {
			HostCommand::QueryContexts { .. } => "queryContexts",
			HostCommand::GetContext { .. } => "getContext",
			HostCommand::CreateContext { .. } => "createContext",
			HostCommand::Navigate { .. } => "navigate",
			HostCommand::CloseContext { .. } => "closeContext",
		}
	}
}

/// Answer to a [`HostCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
	pub id: u64,
	#[serde(default)]
	pub result: Value,
	#[serde(default)]
	pub error: Option<ErrorInfo>,
}

/// Unsolicited notification from the host agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
	/// The context finished loading its current document.
	LoadSettled {
		#[serde(rename = "contextId")]
		context_id: ContextId,
	},
	/// The context no longer exists at the host level.
	ContextRemoved {
		#[serde(rename = "contextId")]
		context_id: ContextId,
	},
}

/// Anything the host agent may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
	Response(HostResponse),
	Event(HostEvent),
}
