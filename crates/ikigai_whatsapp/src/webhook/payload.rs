#![forbid(unsafe_code)]

//! Cloud API webhook callbacks.

use ikigai_domain::{ChannelMessageId, UserId};
use ikigai_protocol::{EventUser, OutboundEvent};
use serde::Deserialize;
use tracing::debug;

use crate::message::parse_callback_id;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
	#[serde(default)]
	pub object: String,
	#[serde(default)]
	pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
	#[serde(default)]
	pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
	#[serde(default)]
	pub field: String,
	pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
	#[serde(default)]
	pub contacts: Vec<Contact>,
	#[serde(default)]
	pub messages: Vec<IncomingMessage>,
	#[serde(default)]
	pub statuses: Vec<Status>,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
	pub wa_id: String,
	#[serde(default)]
	pub profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
pub struct Profile {
	#[serde(default)]
	pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
	pub from: String,
	#[serde(default)]
	pub id: String,
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub text: Option<TextContent>,
	#[serde(default)]
	pub interactive: Option<InteractiveContent>,
	#[serde(default)]
	pub button: Option<TemplateButton>,
}

#[derive(Debug, Deserialize)]
pub struct TextContent {
	pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct InteractiveContent {
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub button_reply: Option<ButtonReply>,
}

#[derive(Debug, Deserialize)]
pub struct ButtonReply {
	pub id: String,
	#[serde(default)]
	pub title: String,
}

/// Quick-reply button on a template message.
#[derive(Debug, Deserialize)]
pub struct TemplateButton {
	pub payload: String,
	#[serde(default)]
	pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct Status {
	pub id: String,
	pub status: String,
	#[serde(default)]
	pub recipient_id: String,
	#[serde(default)]
	pub errors: Vec<StatusError>,
}

#[derive(Debug, Deserialize)]
pub struct StatusError {
	#[serde(default)]
	pub code: Option<i64>,
	#[serde(default)]
	pub title: String,
}

/// Delivery state reported for a message we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
	Delivered(ChannelMessageId),
	Failed(ChannelMessageId, String),
}

/// Everything actionable in one webhook call, in payload order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WebhookUpdate {
	pub events: Vec<OutboundEvent>,
	pub receipts: Vec<Receipt>,
}

impl WebhookPayload {
	pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
		serde_json::from_slice(body)
	}

	/// Normalize into relay events and delivery receipts. Unsupported message types and
	/// intermediate statuses are skipped.
	pub fn into_update(self) -> WebhookUpdate {
		let mut update = WebhookUpdate::default();

		for change in self.entry.into_iter().flat_map(|e| e.changes) {
			if !change.field.is_empty() && change.field != "messages" {
				debug!(field = %change.field, "ignoring webhook change");
				continue;
			}
			let ChangeValue {
				contacts,
				messages,
				statuses,
			} = change.value;

			update.receipts.extend(statuses.into_iter().filter_map(Status::into_receipt));

			for message in messages {
				let username = contacts
					.iter()
					.find(|c| c.wa_id == message.from)
					.and_then(|c| c.profile.as_ref())
					.map(|p| p.name.clone())
					.filter(|n| !n.trim().is_empty())
					.unwrap_or_else(|| message.from.clone());
				if let Some(event) = message.into_event(username) {
					update.events.push(event);
				}
			}
		}

		update
	}
}

impl IncomingMessage {
	fn into_event(self, username: String) -> Option<OutboundEvent> {
		let id = match UserId::new(self.from.as_str()) {
			Ok(id) => id,
			Err(e) => {
				debug!(error = %e, "ignoring message without sender");
				return None;
			}
		};
		let user = EventUser::new(id, username);

		match self.kind.as_str() {
			"text" => self.text.map(|t| OutboundEvent::UserMessage { user, content: t.body }),
			"interactive" => {
				let reply = self.interactive.and_then(|i| i.button_reply)?;
				let (interaction_id, custom_id) = parse_callback_id(&reply.id);
				Some(OutboundEvent::Interaction {
					user,
					interaction_id,
					custom_id,
				})
			}
			"button" => {
				let button = self.button?;
				let (interaction_id, custom_id) = parse_callback_id(&button.payload);
				Some(OutboundEvent::Interaction {
					user,
					interaction_id,
					custom_id,
				})
			}
			other => {
				debug!(kind = other, message_id = %self.id, "ignoring unsupported message type");
				None
			}
		}
	}
}

impl Status {
	fn into_receipt(self) -> Option<Receipt> {
		let id = ChannelMessageId::new(self.id).ok()?;
		match self.status.as_str() {
			"delivered" | "read" => Some(Receipt::Delivered(id)),
			"failed" => {
				let reason = self
					.errors
					.first()
					.map(|e| match e.code {
						Some(code) => format!("{code}: {}", e.title),
						None => e.title.clone(),
					})
					.unwrap_or_else(|| "failed".to_string());
				Some(Receipt::Failed(id, reason))
			}
			_ => None,
		}
	}
}
