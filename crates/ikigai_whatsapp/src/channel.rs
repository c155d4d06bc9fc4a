#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ikigai_domain::{ChannelMessageId, UserId};
use ikigai_relay::{Channel, ChannelError, Choice, DeliveryOutcome, DeliveryTracker, SentHandle};
use url::Url;

use crate::client::{SentMessage, WhatsAppClient};
use crate::config::WhatsAppConfig;
use crate::message::OutgoingMessage;

/// [`Channel`] over the WhatsApp Cloud API.
///
/// Delivery receipts arrive on the webhook, which resolves them through the shared
/// [`DeliveryTracker`].
#[derive(Debug, Clone)]
pub struct WhatsAppChannel {
	client: WhatsAppClient,
	tracker: Arc<DeliveryTracker>,
	sender: String,
	media_base_url: Option<String>,
	button_body: String,
}

impl WhatsAppChannel {
	pub fn new(cfg: &WhatsAppConfig, tracker: Arc<DeliveryTracker>) -> anyhow::Result<Self> {
		Ok(Self {
			client: WhatsAppClient::new(cfg)?,
			tracker,
			sender: cfg.phone_number_id.trim().to_string(),
			media_base_url: cfg.media_base_url.clone(),
			button_body: cfg.button_body.clone(),
		})
	}

	pub fn tracker(&self) -> &Arc<DeliveryTracker> {
		&self.tracker
	}

	/// Absolute URLs pass through; relative paths are joined onto the media base.
	pub fn resolve_media(&self, resource: &str) -> Result<String, ChannelError> {
		resolve_media(self.media_base_url.as_deref(), resource)
	}

	async fn send(&self, message: OutgoingMessage) -> Result<SentHandle, ChannelError> {
		let SentMessage { message_id, recipient } = self.client.send(&message).await?;
		let message_id = ChannelMessageId::new(message_id).map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
		Ok(SentHandle {
			message_id,
			sender: self.sender.clone(),
			recipient,
		})
	}
}

pub fn resolve_media(base: Option<&str>, resource: &str) -> Result<String, ChannelError> {
	let resource = resource.trim();
	if resource.is_empty() {
		return Err(ChannelError::InvalidResource(String::new()));
	}
	if let Ok(url) = Url::parse(resource)
		&& matches!(url.scheme(), "http" | "https")
	{
		return Ok(url.into());
	}

	let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) else {
		return Err(ChannelError::InvalidResource(resource.to_string()));
	};
	// Relative paths always extend the base path, even with a leading slash.
	Url::parse(&format!("{}/", base.trim_end_matches('/')))
		.and_then(|base| base.join(resource.trim_start_matches('/')))
		.map(String::from)
		.map_err(|e| ChannelError::InvalidResource(format!("{resource}: {e}")))
}

#[async_trait]
impl Channel for WhatsAppChannel {
	async fn send_text(&self, user: &UserId, text: &str, choices: &[Choice]) -> Result<SentHandle, ChannelError> {
		let message = if choices.is_empty() {
			OutgoingMessage::text(user.as_str(), text)
		} else {
			OutgoingMessage::buttons(user.as_str(), text, choices)
		};
		self.send(message).await
	}

	async fn send_image(
		&self,
		user: &UserId,
		resource: &str,
		caption: Option<&str>,
		choices: &[Choice],
	) -> Result<SentHandle, ChannelError> {
		let link = self.resolve_media(resource)?;
		let message = if choices.is_empty() {
			OutgoingMessage::image(user.as_str(), &link, caption)
		} else {
			let body = caption.unwrap_or(&self.button_body);
			OutgoingMessage::image_with_buttons(user.as_str(), &link, body, choices)
		};
		self.send(message).await
	}

	async fn send_sticker(&self, user: &UserId, resource: &str) -> Result<SentHandle, ChannelError> {
		let link = self.resolve_media(resource)?;
		self.send(OutgoingMessage::sticker(user.as_str(), &link)).await
	}

	async fn wait_for_delivery(&self, handle: &SentHandle, timeout: Duration) -> DeliveryOutcome {
		self.tracker.wait(&handle.message_id, timeout).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn media_resolution() {
		assert_eq!(
			resolve_media(None, "https://cdn.example/a.png").unwrap(),
			"https://cdn.example/a.png"
		);
		assert_eq!(
			resolve_media(Some("https://cdn.example/media/"), "/quiz/a.png").unwrap(),
			"https://cdn.example/media/quiz/a.png"
		);
		assert!(matches!(
			resolve_media(None, "quiz/a.png"),
			Err(ChannelError::InvalidResource(r)) if r == "quiz/a.png"
		));
		assert!(resolve_media(Some("https://cdn.example"), "  ").is_err());
		assert_eq!(
			resolve_media(Some("https://cdn.example/media"), "quiz/wave 2.webp").unwrap(),
			"https://cdn.example/media/quiz/wave%202.webp"
		);
		assert!(resolve_media(Some("not a base"), "quiz/a.png").is_err());
	}
}
