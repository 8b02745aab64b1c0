//! Error types for the router runtime.

use thiserror::Error;
use um_protocol::{ContextId, ErrorInfo};

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing a request.
#[derive(Debug, Error)]
pub enum Error {
	/// No live context matches the requested target.
	#[error("No context available: {0}")]
	Routing(String),

	/// The context disconnected while a request to it was outstanding.
	#[error("Context {context} disconnected before answering")]
	ContextLost { context: ContextId },

	/// Context creation or navigation failed at the host.
	#[error("Host environment error: {0}")]
	HostEnvironment(String),

	/// Fault raised deliberately by the router itself.
	#[error("{0}")]
	LocalFault(String),

	/// Failure reported by a context or the host agent, with its own context.
	#[error("{name}: {message}")]
	Remote {
		/// Error type name (e.g., "TypeError")
		name: String,
		/// Human-readable error message
		message: String,
		/// Stack trace from the remote side (if available)
		stack: Option<String>,
	},

	/// No answer within the configured deadline.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Transport-level error (framing, pipe closed mid-frame).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Message did not have the expected shape.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Error kind reported to the external process in [`ErrorInfo::name`].
	pub fn kind(&self) -> &str {
		match self {
			Error::Routing(_) => "RoutingError",
			Error::ContextLost { .. } => "ContextLostError",
			Error::HostEnvironment(_) => "HostEnvironmentError",
			Error::LocalFault(_) => "LocalFault",
			Error::Remote { name, .. } => name,
			Error::Timeout(_) => "TimeoutError",
			Error::ChannelClosed => "ChannelClosedError",
			Error::TransportError(_) => "TransportError",
			Error::ProtocolError(_) => "ProtocolError",
			Error::Io(_) => "IoError",
			Error::Json(_) => "JsonError",
		}
	}

	/// Converts to the structured form carried in a response envelope.
	pub fn to_error_info(&self) -> ErrorInfo {
		match self {
			Error::Remote {
				name,
				message,
				stack,
			} => ErrorInfo {
				name: name.clone(),
				message: message.clone(),
				stack: stack.clone(),
			},
			other => ErrorInfo::new(other.kind(), other.to_string()),
		}
	}

	/// Rebuilds a remote failure from its wire form.
	pub fn from_error_info(info: ErrorInfo) -> Self {
		Error::Remote {
			name: info.name,
			message: info.message,
			stack: info.stack,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::Timeout(_) => true,
			Error::Remote { name, .. } => name == "TimeoutError",
			_ => false,
		}
	}

	/// Returns true if the target context went away.
	pub fn is_context_lost(&self) -> bool {
		matches!(self, Error::ContextLost { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_map_to_error_info_names() {
		let info = Error::ContextLost {
			context: ContextId(4),
		}
		.to_error_info();
		assert_eq!(info.name, "ContextLostError");
		assert_eq!(info.message, "Context 4 disconnected before answering");

		assert_eq!(Error::Routing("x".into()).to_error_info().name, "RoutingError");
		assert_eq!(Error::LocalFault("boom".into()).to_error_info().message, "boom");
		assert_eq!(Error::Timeout("slow".into()).kind(), "TimeoutError");
	}

	#[test]
	fn remote_errors_keep_their_identity() {
		let mut wire = ErrorInfo::new("TypeError", "This is a foreground test");
		wire.stack = Some("handleMessage@foreground.js".into());
		let error = Error::from_error_info(wire.clone());
		assert_eq!(error.to_string(), "TypeError: This is a foreground test");
		assert_eq!(error.to_error_info(), wire);
	}

	#[test]
	fn timeout_detection() {
		assert!(Error::Timeout("t".into()).is_timeout());
		assert!(Error::from_error_info(ErrorInfo::new("TimeoutError", "t")).is_timeout());
		assert!(!Error::ChannelClosed.is_timeout());
	}
}
