#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest inbound frame accepted before JSON parsing.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

/// `{action, content}` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
	pub action: String,
	pub content: T,
}

/// Inbound envelope with the payload left undecoded until the action tag is known.
pub type RawEnvelope = Envelope<serde_json::Value>;

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge { len: usize, max: usize },

	#[error("invalid json frame: {0}")]
	Json(#[from] serde_json::Error),

	#[error("unknown action `{0}`")]
	UnknownAction(String),

	#[error("invalid `{action}` payload: {source}")]
	Payload {
		action: &'static str,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid `{action}` payload: {reason}")]
	Invalid { action: &'static str, reason: String },
}

#[derive(Deserialize)]
struct Peek {
	action: String,
	#[serde(default)]
	content: serde_json::Value,
}

impl From<Peek> for RawEnvelope {
	fn from(peek: Peek) -> Self {
		Envelope {
			action: peek.action,
			content: peek.content,
		}
	}
}

/// Parse the outer `{action, content}` object. A missing `content` decodes as `null`.
pub fn decode_raw(frame: &str, max_frame_size: usize) -> Result<RawEnvelope, DecodeError> {
	if frame.len() > max_frame_size {
		return Err(DecodeError::FrameTooLarge {
			len: frame.len(),
			max: max_frame_size,
		});
	}
	let peek: Peek = serde_json::from_str(frame)?;
	Ok(peek.into())
}

/// Same as [`decode_raw`] for an already parsed JSON value.
pub fn raw_from_value(value: serde_json::Value) -> Result<RawEnvelope, DecodeError> {
	let peek: Peek = serde_json::from_value(value)?;
	Ok(peek.into())
}
