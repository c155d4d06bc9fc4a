#![forbid(unsafe_code)]

use anyhow::Context;
use ikigai_relay::{ChannelError, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::config::WhatsAppConfig;
use crate::message::OutgoingMessage;

/// Cloud API response to a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
	pub message_id: String,
	/// WhatsApp id of the recipient as normalized by the API; falls back to the `to` we sent.
	pub recipient: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
	#[serde(default)]
	contacts: Vec<SendResponseContact>,
	#[serde(default)]
	messages: Vec<SendResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct SendResponseContact {
	wa_id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponseMessage {
	id: String,
}

#[derive(Debug, Clone)]
pub struct WhatsAppClient {
	messages_url: String,
	access_token: SecretString,
	client: reqwest::Client,
}

impl WhatsAppClient {
	pub fn new(cfg: &WhatsAppConfig) -> anyhow::Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(cfg.request_timeout)
			.danger_accept_invalid_certs(!cfg.verify_tls)
			.build()
			.context("build whatsapp http client")?;

		Ok(Self {
			messages_url: cfg.messages_url(),
			access_token: cfg.access_token.clone(),
			client,
		})
	}

	pub fn messages_url(&self) -> &str {
		&self.messages_url
	}

	pub async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, ChannelError> {
		let kind = message.kind();
		let resp = self
			.client
			.post(&self.messages_url)
			.bearer_auth(self.access_token.expose())
			.json(message)
			.send()
			.await
			.map_err(|e| ChannelError::Request(format!("whatsapp send {kind}: {e}")))?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.map_err(|e| ChannelError::Request(format!("whatsapp send {kind} body: {e}")))?;

		if !status.is_success() {
			metrics::counter!("ikigai_whatsapp_send_errors_total", "kind" => kind).increment(1);
			return Err(ChannelError::Rejected {
				status: status.as_u16(),
				body: body.chars().take(512).collect(),
			});
		}

		let parsed: SendResponse =
			serde_json::from_str(&body).map_err(|e| ChannelError::InvalidResponse(format!("parse send response: {e}")))?;
		let message_id = parsed
			.messages
			.into_iter()
			.next()
			.map(|m| m.id)
			.filter(|id| !id.trim().is_empty())
			.ok_or_else(|| ChannelError::InvalidResponse("send response carries no message id".to_string()))?;
		let recipient = parsed
			.contacts
			.into_iter()
			.next()
			.map(|c| c.wa_id)
			.unwrap_or_else(|| message.to.clone());

		metrics::counter!("ikigai_whatsapp_messages_sent_total", "kind" => kind).increment(1);
		debug!(kind, message_id = %message_id, to = %recipient, "whatsapp message accepted");
		Ok(SentMessage { message_id, recipient })
	}
}
