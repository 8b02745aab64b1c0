//! Commands carried in a [`RequestEnvelope`](crate::RequestEnvelope) payload.
//!
//! The external process tags each payload with a dotted `type` such as
//! `edu.example.player.CommandSeek`. Only the segment after the last `.` is
//! significant, so namespaced tags match the short names used here. Both the
//! short names (`Seek`) and the class-style names (`CommandSeek`) are accepted.

use serde_json::{Map, Value};

use crate::playback::PlaybackAction;

/// Returns the significant part of a dotted type tag.
pub fn command_name(tag: &str) -> &str {
	tag.rsplit('.').next().unwrap_or(tag)
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	/// Liveness check. With a `url` it becomes a routed round trip.
	Ping { number: i64, url: Option<String> },
	/// Replace the pinned context with one loading `url`.
	LoadSong { url: Option<String> },
	QueryStatus,
	QueryTime,
	QueryLength,
	/// `action` is `None` when the payload named an unknown state; the
	/// command is still forwarded and the context decides.
	SetPlayback { action: Option<PlaybackAction> },
	Seek { position_ms: Option<u64> },
	Quit,
	/// Exercises error propagation. `forward` routes it to the active context,
	/// otherwise the router raises locally.
	ReportError { forward: bool, detail: Option<Value> },
	/// Metadata lookup through a disposable context.
	QuerySongData { url: Option<String> },
	/// Any tag no built-in handler knows.
	Unknown { tag: Option<String> },
}

impl Command {
	/// Decodes a payload. Never fails: unrecognised shapes become [`Command::Unknown`].
	pub fn from_value(payload: &Value) -> Self {
		if let Some(text) = payload.as_str() {
			return if command_name(text).eq_ignore_ascii_case("quit") {
				Command::Quit
			} else {
				Command::Unknown {
					tag: Some(text.to_string()),
				}
			};
		}

		let Some(fields) = payload.as_object() else {
			return Command::Unknown { tag: None };
		};
		let Some(tag) = fields.get("type").and_then(Value::as_str) else {
			return Command::Unknown { tag: None };
		};

		match command_name(tag) {
			"Ping" | "NumberPing" => Command::Ping {
				number: fields.get("number").and_then(Value::as_i64).unwrap_or_default(),
				url: string_field(fields, &["url"]),
			},
			"LoadSong" | "CommandLoadSong" => Command::LoadSong {
				url: string_field(fields, &["song", "url"]),
			},
			"QueryStatus" => Command::QueryStatus,
			"QueryTime" => Command::QueryTime,
			"QueryLength" => Command::QueryLength,
			"SetPlayback" | "CommandSetPlayback" => Command::SetPlayback {
				action: string_field(fields, &["status", "state"]).and_then(|s| PlaybackAction::parse(&s)),
			},
			"Seek" | "CommandSeek" => Command::Seek {
				position_ms: fields
					.get("time")
					.and_then(Value::as_f64)
					.filter(|ms| ms.is_finite() && *ms >= 0.0)
					.map(|ms| ms.round() as u64),
			},
			"Quit" | "CommandQuit" => Command::Quit,
			"ReportError" | "CommandError" => Command::ReportError {
				forward: fields.get("forward").and_then(Value::as_bool).unwrap_or(false),
				detail: fields.get("detail").cloned(),
			},
			"QuerySongData" => Command::QuerySongData {
				url: string_field(fields, &["url"]),
			},
			_ => Command::Unknown {
				tag: Some(tag.to_string()),
			},
		}
	}

	/// Short name used in logs.
	pub fn name(&self) -> &'static str {
		match self {
			Command::Ping { .. } => "Ping",
			Command::LoadSong { .. } => "LoadSong",
			Command::QueryStatus => "QueryStatus",
			Command::QueryTime => "QueryTime",
			Command::QueryLength => "QueryLength",
			Command::SetPlayback { .. } => "SetPlayback",
			Command::Seek { .. } => "Seek",
			Command::Quit => "Quit",
			Command::ReportError { .. } => "ReportError",
			Command::QuerySongData { .. } => "QuerySongData",
			Command::Unknown { .. } => "Unknown",
		}
	}
}

fn string_field(fields: &Map<String, Value>, names: &[&str]) -> Option<String> {
	names
		.iter()
		.find_map(|name| fields.get(*name).and_then(Value::as_str))
		.map(str::to_string)
}
