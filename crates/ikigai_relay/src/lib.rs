#![forbid(unsafe_code)]

//! Session relay between a messaging channel and the backend orchestration server.
//!
//! Outbound: channel event → [`ikigai_protocol::serialize_event`] → [`Backend::post_event`]
//! (per-user streaming connection with one reconnect, or one HTTP request per event).
//!
//! Inbound: backend frame → [`InboundDispatcher`] → per-user [`InstructionQueues`] → worker →
//! [`ActionExecutor`] → [`Channel`] (batched, delivery-ack gated).

pub mod backend;
pub mod channel;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod transport;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod executor_tests;

#[cfg(test)]
mod queue_tests;



use std::fmt;

pub use backend::{Backend, BackendMode, HttpBackend, StreamingBackend};
pub use channel::{Channel, ChannelError, Choice, DeliveryOutcome, SentHandle};
pub use config::{BackendConfig, RelayConfig};
pub use delivery::DeliveryTracker;
pub use dispatcher::InboundDispatcher;
pub use error::{RelayError, TransportError};
pub use executor::{ActionExecutor, Delivery, ExecutorConfig, MAX_CHOICES_PER_MESSAGE};
pub use queue::{InstructionHandler, InstructionQueues, InstructionSink, QueueConfig};
pub use registry::{ConnectionRegistry, MAX_SEND_RETRIES, RegistryConfig};
pub use relay::SessionRelay;
pub use transport::{Connection, ConnectionState, FrameSink, FrameStream, Transport, WsTransport};

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		String::deserialize(deserializer).map(SecretString)
	}
}
