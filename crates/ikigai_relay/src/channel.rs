#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use ikigai_domain::{ChannelMessageId, UserId};
use ikigai_protocol::Button;
use thiserror::Error;

/// Interactive choice as the channel renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
	pub id: i64,
	pub custom_id: String,
	pub label: String,
}

impl From<&Button> for Choice {
	fn from(b: &Button) -> Self {
		Self {
			id: b.id,
			custom_id: b.custom_id.clone(),
			label: b.label.clone(),
		}
	}
}

/// What the channel hands back for a sent message; used to correlate delivery receipts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentHandle {
	pub message_id: ChannelMessageId,
	pub sender: String,
	pub recipient: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
	Delivered,
	Failed(String),
	TimedOut,
}

#[derive(Debug, Error)]
pub enum ChannelError {
	#[error("request failed: {0}")]
	Request(String),

	#[error("rejected by channel (status {status}): {body}")]
	Rejected { status: u16, body: String },

	#[error("invalid channel response: {0}")]
	InvalidResponse(String),

	#[error("invalid resource `{0}`")]
	InvalidResource(String),
}

/// End-user messaging channel.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
	async fn send_text(&self, user: &UserId, text: &str, choices: &[Choice]) -> Result<SentHandle, ChannelError>;

	async fn send_image(
		&self,
		user: &UserId,
		resource: &str,
		caption: Option<&str>,
		choices: &[Choice],
	) -> Result<SentHandle, ChannelError>;

	async fn send_sticker(&self, user: &UserId, resource: &str) -> Result<SentHandle, ChannelError>;

	/// Wait until the channel confirms delivery of `handle`, or `timeout` elapses.
	async fn wait_for_delivery(&self, handle: &SentHandle, timeout: Duration) -> DeliveryOutcome;
}
