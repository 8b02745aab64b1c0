//! Context identity and the envelopes exchanged with page contexts.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::ErrorInfo;

/// Opaque context identifier assigned by the host (a tab id in a browser).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ContextId {
	type Err = ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.parse().map(ContextId)
	}
}

/// Navigation state reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
	Loading,
	#[default]
	Complete,
}

/// Host-level description of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
	pub id: ContextId,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub status: LoadStatus,
	/// Muted contexts are disposable and never reused.
	#[serde(default)]
	pub muted: bool,
}

impl ContextInfo {
	pub fn is_settled(&self) -> bool {
		self.status == LoadStatus::Complete
	}

	pub fn is_reusable(&self) -> bool {
		!self.muted
	}
}

/// Router → context query. `num` is the router's correlation counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRequest {
	pub num: u64,
	pub data: Value,
}

/// Context → router message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContextMessage {
	/// Answer to the [`ContextRequest`] with the same `num`.
	Response {
		num: u64,
		#[serde(default)]
		data: Value,
	},
	/// The context failed to service request `num`.
	Error { num: u64, error: ErrorInfo },
	/// Unsolicited event (playback change, log line). Never correlated.
	Update {
		#[serde(default)]
		data: Value,
	},
}
