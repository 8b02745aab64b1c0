//! Runtime plumbing for the media context router: the framed stdio
//! transport, the correlation table that pairs answers with requests, and
//! the shared error type.

pub mod correlation;
pub mod error;
pub mod transport;

pub use correlation::{Correlation, CorrelationTable};
pub use error::{Error, Result};
pub use transport::{
	MAX_MESSAGE_SIZE, PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts,
	TransportReceiver,
};
