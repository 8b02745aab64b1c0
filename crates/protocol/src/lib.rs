//! Wire types for the media context router.
//!
//! Three links carry JSON through the router, and each has its own module:
//!
//! - [`envelope`] / [`command`]: the external control process, which sends
//!   [`RequestEnvelope`]s and receives [`ResponseEnvelope`]s
//! - [`context`]: page contexts, which exchange [`ContextRequest`]s and
//!   [`ContextMessage`]s
//! - [`host`]: the host agent that enumerates, creates, navigates and closes
//!   contexts on the router's behalf
//!
//! Types in this crate are pure data. Routing behavior lives in `um-router`.

pub mod command;
pub mod context;
pub mod envelope;
pub mod host;
pub mod playback;

pub use command::{Command, command_name};
pub use context::{ContextId, ContextInfo, ContextMessage, ContextRequest, LoadStatus};
pub use envelope::{CommandResult, ErrorInfo, RequestEnvelope, ResponseEnvelope, UPDATE_REQUEST_ID};
pub use host::{HostCommand, HostEvent, HostMessage, HostResponse};
pub use playback::{LogRecord, PlaybackAction, PlaybackInfo, PlaybackStatus, SongMetadata, UpdateEvent};
