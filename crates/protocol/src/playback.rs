//! Playback payloads produced by context adapters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::command_name;

/// Playback state as reported by `getPlaybackState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackStatus {
	Playing,
	Paused,
	Stopped,
	Finished,
	/// Nothing loaded. Also the router's reply to `QueryStatus` when no
	/// context is active.
	Empty,
}

/// Requested transition for `SetPlayback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackAction {
	Play,
	Pause,
}

impl PlaybackAction {
	pub fn parse(s: &str) -> Option<Self> {
		match s.to_ascii_uppercase().as_str() {
			"PLAY" => Some(Self::Play),
			"PAUSE" => Some(Self::Pause),
			_ => None,
		}
	}
}

/// Best-effort song record scraped from a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongMetadata {
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub artists: Vec<String>,
	#[serde(default)]
	pub album: Option<String>,
	#[serde(default)]
	pub duration_ms: Option<u64>,
	#[serde(default)]
	pub source_url: Option<String>,
}

/// Periodic playback update pushed by a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfo {
	pub status: PlaybackStatus,
	#[serde(default)]
	pub play_time: f64,
	#[serde(default)]
	pub current_song: Option<SongMetadata>,
}

/// Structured log line forwarded from a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
	#[serde(default)]
	pub logger: String,
	#[serde(default = "default_level")]
	pub level: String,
	#[serde(default)]
	pub message: Vec<Value>,
}

fn default_level() -> String {
	"info".to_string()
}

impl LogRecord {
	/// Joins the message arguments into one line.
	pub fn text(&self) -> String {
		self.message
			.iter()
			.map(|part| match part {
				Value::String(s) => s.clone(),
				other => other.to_string(),
			})
			.collect::<Vec<_>>()
			.join(" ")
	}
}

/// Classification of an update payload, used for router-side logging only.
/// The payload itself is relayed untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
	Playback(PlaybackInfo),
	Log(LogRecord),
	Other,
}

impl UpdateEvent {
	pub fn classify(data: &Value) -> Self {
		let tag = data.get("type").and_then(Value::as_str).map(command_name);
		match tag {
			Some("PlaybackInfo") => serde_json::from_value(data.clone())
				.map(UpdateEvent::Playback)
				.unwrap_or(UpdateEvent::Other),
			Some("Log") => serde_json::from_value(data.clone())
				.map(UpdateEvent::Log)
				.unwrap_or(UpdateEvent::Other),
			_ => UpdateEvent::Other,
		}
	}
}
