#![forbid(unsafe_code)]

use ikigai_domain::{ChannelKind, UserId};
use serde::Serialize;

use crate::actions;
use crate::envelope::Envelope;

/// Normalized channel-side user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventUser {
	pub id: UserId,
	pub username: String,
}

impl EventUser {
	pub fn new(id: UserId, username: impl Into<String>) -> Self {
		Self {
			id,
			username: username.into(),
		}
	}
}

/// Event originating on the channel side, bound for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
	UserMessage {
		user: EventUser,
		content: String,
	},
	Interaction {
		user: EventUser,
		interaction_id: i64,
		custom_id: String,
	},
}

impl OutboundEvent {
	pub fn user(&self) -> &EventUser {
		match self {
			OutboundEvent::UserMessage { user, .. } | OutboundEvent::Interaction { user, .. } => user,
		}
	}

	pub fn user_id(&self) -> &UserId {
		&self.user().id
	}

	/// Wire action tag.
	pub fn action(&self) -> &'static str {
		match self {
			OutboundEvent::UserMessage { .. } => actions::MESSAGE,
			OutboundEvent::Interaction { .. } => actions::BUTTON_CLICK,
		}
	}
}

#[derive(Debug, Serialize)]
pub struct PlatformRef<'a> {
	id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AuthorContent<'a> {
	platform_id: PlatformRef<'a>,
	username: &'a str,
	guild: Option<()>,
}

#[derive(Debug, Serialize)]
pub struct ChannelContent<'a> {
	platform_id: PlatformRef<'a>,
	name: &'a str,
	#[serde(rename = "type")]
	kind: ChannelKind,
	guild: Option<()>,
}

/// `content` half of an outbound envelope.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EventContent<'a> {
	Message {
		content: &'a str,
		author: AuthorContent<'a>,
		channel: ChannelContent<'a>,
	},
	ButtonClick {
		id: i64,
		custom_id: &'a str,
		user: AuthorContent<'a>,
		channel: ChannelContent<'a>,
	},
}

fn author(user: &EventUser) -> AuthorContent<'_> {
	AuthorContent {
		platform_id: PlatformRef { id: user.id.as_str() },
		username: &user.username,
		guild: None,
	}
}

// Conversations are always direct messages named after the user.
fn dm_channel(user: &EventUser) -> ChannelContent<'_> {
	ChannelContent {
		platform_id: PlatformRef { id: user.id.as_str() },
		name: &user.username,
		kind: ChannelKind::Dm,
		guild: None,
	}
}

/// Map an event into the backend envelope. Pure; both backend modes send exactly this.
pub fn serialize_event(event: &OutboundEvent) -> Envelope<EventContent<'_>> {
	let content = match event {
		OutboundEvent::UserMessage { user, content } => EventContent::Message {
			content,
			author: author(user),
			channel: dm_channel(user),
		},
		OutboundEvent::Interaction {
			user,
			interaction_id,
			custom_id,
		} => EventContent::ButtonClick {
			id: *interaction_id,
			custom_id,
			user: author(user),
			channel: dm_channel(user),
		},
	};

	Envelope {
		action: event.action().to_string(),
		content,
	}
}

impl OutboundEvent {
	/// Serialized JSON frame.
	pub fn to_frame(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(&serialize_event(self))
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn user() -> EventUser {
		EventUser::new(UserId::new("351912345678").unwrap(), "Ana")
	}

	#[test]
	fn serializes_user_message() {
		let event = OutboundEvent::UserMessage {
			user: user(),
			content: "hi".to_string(),
		};
		let value = serde_json::to_value(serialize_event(&event)).unwrap();
		assert_eq!(
			value,
			json!({
				"action": "message",
				"content": {
					"content": "hi",
					"author": {"platform_id": {"id": "351912345678"}, "username": "Ana", "guild": null},
					"channel": {"platform_id": {"id": "351912345678"}, "name": "Ana", "type": "dm", "guild": null}
				}
			})
		);
	}

	#[test]
	fn serializes_interaction() {
		let event = OutboundEvent::Interaction {
			user: user(),
			interaction_id: 7,
			custom_id: "start_quiz".to_string(),
		};
		let value: serde_json::Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
		assert_eq!(value["action"], "button_click");
		assert_eq!(value["content"]["id"], 7);
		assert_eq!(value["content"]["custom_id"], "start_quiz");
		assert_eq!(value["content"]["user"]["platform_id"]["id"], "351912345678");
		assert_eq!(value["content"]["channel"]["type"], "dm");
	}

	#[test]
	fn action_and_user_accessors() {
		let event = OutboundEvent::UserMessage {
			user: user(),
			content: String::new(),
		};
		assert_eq!(event.action(), "message");
		assert_eq!(event.user_id().as_str(), "351912345678");
	}
}
