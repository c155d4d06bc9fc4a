#![forbid(unsafe_code)]

mod http;
mod streaming;

use core::fmt;
use core::str::FromStr;

use async_trait::async_trait;
use ikigai_protocol::{Instruction, OutboundEvent};
use serde::Deserialize;

use crate::error::RelayError;

pub use http::HttpBackend;
pub use streaming::StreamingBackend;

/// Delivers one outbound event to the backend.
///
/// Request/response backends return the replies directly; streaming backends return an empty
/// list because replies arrive later on the user's connection.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
	async fn post_event(&self, event: &OutboundEvent) -> Result<Vec<Instruction>, RelayError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum BackendMode {
	/// Persistent websocket per user.
	#[default]
	Streaming,
	/// One HTTP POST per event.
	Http,
}

impl BackendMode {
	pub const fn as_str(self) -> &'static str {
		match self {
			BackendMode::Streaming => "websocket",
			BackendMode::Http => "api",
		}
	}
}

impl fmt::Display for BackendMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BackendMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"websocket" | "ws" | "streaming" => Ok(BackendMode::Streaming),
			"api" | "http" | "https" => Ok(BackendMode::Http),
			other => Err(format!("unknown backend mode `{other}` (expected websocket or api)")),
		}
	}
}

impl TryFrom<String> for BackendMode {
	type Error = String;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
