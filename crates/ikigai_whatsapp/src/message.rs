#![forbid(unsafe_code)]

//! Outbound Cloud API message bodies.

use ikigai_relay::Choice;
use serde::Serialize;

/// Longest reply-button title the Cloud API accepts.
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;
/// Longest interactive body text the Cloud API accepts.
pub const MAX_INTERACTIVE_BODY_CHARS: usize = 1024;

/// Reply-button id sent to WhatsApp and echoed back on click: `"{id}:{custom_id}"`.
pub fn callback_id(choice: &Choice) -> String {
	format!("{}:{}", choice.id, choice.custom_id)
}

/// Split a reply-button id back into `(id, custom_id)`.
///
/// Ids that do not carry a numeric prefix are passed through whole as the custom id with id `0`.
pub fn parse_callback_id(raw: &str) -> (i64, String) {
	match raw.split_once(':') {
		Some((id, custom)) => match id.trim().parse::<i64>() {
			Ok(id) => (id, custom.to_string()),
			Err(_) => (0, raw.to_string()),
		},
		None => (0, raw.to_string()),
	}
}

fn truncate(s: &str, max_chars: usize) -> String {
	match s.char_indices().nth(max_chars) {
		Some((idx, _)) => s[..idx].to_string(),
		None => s.to_string(),
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
	messaging_product: &'static str,
	recipient_type: &'static str,
	pub to: String,
	#[serde(flatten)]
	pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
	Text { text: TextBody },
	Image { image: Media },
	Sticker { sticker: Media },
	Interactive { interactive: Interactive },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBody {
	pub preview_url: bool,
	pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Media {
	pub link: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interactive {
	#[serde(rename = "type")]
	kind: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub header: Option<Header>,
	pub body: InteractiveText,
	pub action: ButtonAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Header {
	Image { image: Media },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractiveText {
	pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonAction {
	pub buttons: Vec<ReplyButton>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyButton {
	#[serde(rename = "type")]
	kind: &'static str,
	pub reply: Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
	pub id: String,
	pub title: String,
}

impl From<&Choice> for ReplyButton {
	fn from(choice: &Choice) -> Self {
		Self {
			kind: "reply",
			reply: Reply {
				id: callback_id(choice),
				title: truncate(&choice.label, MAX_BUTTON_TITLE_CHARS),
			},
		}
	}
}

impl OutgoingMessage {
	fn new(to: &str, body: MessageBody) -> Self {
		Self {
			messaging_product: "whatsapp",
			recipient_type: "individual",
			to: to.to_string(),
			body,
		}
	}

	pub fn text(to: &str, text: &str) -> Self {
		Self::new(
			to,
			MessageBody::Text {
				text: TextBody {
					preview_url: false,
					body: text.to_string(),
				},
			},
		)
	}

	pub fn buttons(to: &str, text: &str, choices: &[Choice]) -> Self {
		Self::interactive(to, None, text, choices)
	}

	pub fn image(to: &str, link: &str, caption: Option<&str>) -> Self {
		Self::new(
			to,
			MessageBody::Image {
				image: Media {
					link: link.to_string(),
					caption: caption.map(str::to_string),
				},
			},
		)
	}

	/// Interactive message with the image as its header and `text` as its body.
	pub fn image_with_buttons(to: &str, link: &str, text: &str, choices: &[Choice]) -> Self {
		let header = Header::Image {
			image: Media {
				link: link.to_string(),
				caption: None,
			},
		};
		Self::interactive(to, Some(header), text, choices)
	}

	pub fn sticker(to: &str, link: &str) -> Self {
		Self::new(
			to,
			MessageBody::Sticker {
				sticker: Media {
					link: link.to_string(),
					caption: None,
				},
			},
		)
	}

	fn interactive(to: &str, header: Option<Header>, text: &str, choices: &[Choice]) -> Self {
		Self::new(
			to,
			MessageBody::Interactive {
				interactive: Interactive {
					kind: "button",
					header,
					body: InteractiveText {
						text: truncate(text, MAX_INTERACTIVE_BODY_CHARS),
					},
					action: ButtonAction {
						buttons: choices.iter().map(ReplyButton::from).collect(),
					},
				},
			},
		)
	}

	pub fn kind(&self) -> &'static str {
		match &self.body {
			MessageBody::Text { .. } => "text",
			MessageBody::Image { .. } => "image",
			MessageBody::Sticker { .. } => "sticker",
			MessageBody::Interactive { .. } => "interactive",
		}
	}
}
