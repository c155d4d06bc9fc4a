#![forbid(unsafe_code)]

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::envelope::{DEFAULT_MAX_FRAME_SIZE, DecodeError, Envelope, RawEnvelope, decode_raw, raw_from_value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUser {
	pub id: i64,
	pub username: String,
	#[serde(default)]
	pub platform_ids: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendChannel {
	pub id: i64,
	pub name: String,
	#[serde(default)]
	pub platform_ids: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendGuild {
	pub id: i64,
	pub name: String,
	#[serde(default)]
	pub platform_ids: HashMap<String, String>,
}

/// Interactive choice attached to a message or image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
	pub id: i64,
	pub custom_id: String,
	#[serde(default)]
	pub style: i64,
	pub label: String,
	#[serde(default)]
	pub clicked: bool,
	#[serde(default)]
	pub remove_after_click: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
	#[serde(default)]
	pub user: Option<BackendUser>,
	#[serde(default)]
	pub channel: Option<BackendChannel>,
	pub message: String,
	#[serde(default)]
	pub buttons: Vec<Button>,
	#[serde(default)]
	pub delete_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
	#[serde(default)]
	pub user: Option<BackendUser>,
	#[serde(default)]
	pub channel: Option<BackendChannel>,
	pub image: String,
	#[serde(default)]
	pub buttons: Vec<Button>,
	#[serde(default)]
	pub caption: Option<String>,
	#[serde(default)]
	pub delete_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePayload {
	pub user: BackendUser,
	#[serde(default)]
	pub guild: Option<BackendGuild>,
	pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
	#[serde(default)]
	pub user: Option<BackendUser>,
	#[serde(default)]
	pub channel: Option<BackendChannel>,
}

/// Reply instruction emitted by the backend for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
	Message(MessagePayload),
	Image(ImagePayload),
	AddRole(RolePayload),
	RemoveRole(RolePayload),
	StartTyping(TypingPayload),
	StopTyping(TypingPayload),
	/// Terminal: the user's worker exits after this.
	StopProcess,
}

impl Instruction {
	pub const MESSAGE: &'static str = "message";
	pub const IMAGE: &'static str = "image";
	pub const ADD_ROLE: &'static str = "add_role";
	pub const REMOVE_ROLE: &'static str = "remove_role";
	pub const START_TYPING: &'static str = "start_typing";
	pub const STOP_TYPING: &'static str = "stop_typing";
	pub const STOP_PROCESS: &'static str = "stop_process";

	/// Wire action tag.
	pub fn tag(&self) -> &'static str {
		match self {
			Instruction::Message(_) => Self::MESSAGE,
			Instruction::Image(_) => Self::IMAGE,
			Instruction::AddRole(_) => Self::ADD_ROLE,
			Instruction::RemoveRole(_) => Self::REMOVE_ROLE,
			Instruction::StartTyping(_) => Self::START_TYPING,
			Instruction::StopTyping(_) => Self::STOP_TYPING,
			Instruction::StopProcess => Self::STOP_PROCESS,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Instruction::StopProcess)
	}

	/// Decode one inbound frame using [`DEFAULT_MAX_FRAME_SIZE`].
	pub fn decode(frame: &str) -> Result<Self, DecodeError> {
		Self::decode_with_limit(frame, DEFAULT_MAX_FRAME_SIZE)
	}

	pub fn decode_with_limit(frame: &str, max_frame_size: usize) -> Result<Self, DecodeError> {
		Self::from_envelope(decode_raw(frame, max_frame_size)?)
	}

	/// Decode the payload against the schema of its action tag, then validate it.
	pub fn from_envelope(raw: RawEnvelope) -> Result<Self, DecodeError> {
		let content = raw.content;
		let instruction = match raw.action.as_str() {
			Self::MESSAGE => Instruction::Message(payload(Self::MESSAGE, content)?),
			Self::IMAGE => Instruction::Image(payload(Self::IMAGE, content)?),
			Self::ADD_ROLE => Instruction::AddRole(payload(Self::ADD_ROLE, content)?),
			Self::REMOVE_ROLE => Instruction::RemoveRole(payload(Self::REMOVE_ROLE, content)?),
			Self::START_TYPING => Instruction::StartTyping(typing_payload(Self::START_TYPING, content)?),
			Self::STOP_TYPING => Instruction::StopTyping(typing_payload(Self::STOP_TYPING, content)?),
			Self::STOP_PROCESS => Instruction::StopProcess,
			_ => return Err(DecodeError::UnknownAction(raw.action)),
		};
		instruction.validate()?;
		Ok(instruction)
	}

	/// Decode a request/response reply body: a JSON list of envelopes, or a single envelope.
	///
	/// The outer result fails only when the body itself is unusable; each element carries its own
	/// result so one bad instruction does not discard its neighbours.
	pub fn decode_list(body: &str) -> Result<Vec<Result<Self, DecodeError>>, DecodeError> {
		let trimmed = body.trim();
		if trimmed.is_empty() {
			return Ok(Vec::new());
		}
		if trimmed.len() > DEFAULT_MAX_FRAME_SIZE {
			return Err(DecodeError::FrameTooLarge {
				len: trimmed.len(),
				max: DEFAULT_MAX_FRAME_SIZE,
			});
		}

		let value: serde_json::Value = serde_json::from_str(trimmed)?;
		let items = match value {
			serde_json::Value::Array(items) => items,
			serde_json::Value::Null => Vec::new(),
			other => vec![other],
		};

		Ok(items
			.into_iter()
			.map(|item| raw_from_value(item).and_then(Self::from_envelope))
			.collect())
	}

	/// Semantic checks the schema alone cannot express.
	pub fn validate(&self) -> Result<(), DecodeError> {
		match self {
			Instruction::Message(p) if p.message.trim().is_empty() && p.buttons.is_empty() => Err(DecodeError::Invalid {
				action: Self::MESSAGE,
				reason: "message has neither text nor buttons".to_string(),
			}),
			Instruction::Image(p) if p.image.trim().is_empty() => Err(DecodeError::Invalid {
				action: Self::IMAGE,
				reason: "image resource path is empty".to_string(),
			}),
			Instruction::AddRole(p) | Instruction::RemoveRole(p) if p.role.trim().is_empty() => Err(DecodeError::Invalid {
				action: self.tag(),
				reason: "role is empty".to_string(),
			}),
			_ => Ok(()),
		}
	}

	/// Encode back into an `{action, content}` frame.
	pub fn to_frame(&self) -> Result<String, serde_json::Error> {
		let content = match self {
			Instruction::Message(p) => serde_json::to_value(p)?,
			Instruction::Image(p) => serde_json::to_value(p)?,
			Instruction::AddRole(p) | Instruction::RemoveRole(p) => serde_json::to_value(p)?,
			Instruction::StartTyping(p) | Instruction::StopTyping(p) => serde_json::to_value(p)?,
			Instruction::StopProcess => serde_json::Value::Null,
		};
		serde_json::to_string(&Envelope {
			action: self.tag().to_string(),
			content,
		})
	}
}

fn payload<T: DeserializeOwned>(action: &'static str, content: serde_json::Value) -> Result<T, DecodeError> {
	serde_json::from_value(content).map_err(|source| DecodeError::Payload { action, source })
}

// Typing indicators may arrive with no content at all.
fn typing_payload(action: &'static str, content: serde_json::Value) -> Result<TypingPayload, DecodeError> {
	if content.is_null() {
		return Ok(TypingPayload::default());
	}
	payload(action, content)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_message_without_buttons() {
		let frame = r#"{"action":"message","content":{"message":"hello","user":{"id":1,"username":"ana","platform_ids":{"whatsapp":"351"}}}}"#;
		match Instruction::decode(frame).unwrap() {
			Instruction::Message(p) => {
				assert_eq!(p.message, "hello");
				assert!(p.buttons.is_empty());
				assert_eq!(p.user.unwrap().platform_ids.get("whatsapp").map(String::as_str), Some("351"));
			}
			other => panic!("unexpected instruction: {other:?}"),
		}
	}

	#[test]
	fn decodes_image_with_buttons() {
		let frame = r#"{"action":"image","content":{"image":"media/cat.png","caption":"cat","buttons":[{"id":1,"custom_id":"a","label":"A"}]}}"#;
		let Instruction::Image(p) = Instruction::decode(frame).unwrap() else {
			panic!("expected image");
		};
		assert_eq!(p.caption.as_deref(), Some("cat"));
		assert_eq!(p.buttons[0].custom_id, "a");
		assert!(!p.buttons[0].clicked);
	}

	#[test]
	fn decodes_terminal_and_no_op_actions() {
		assert!(Instruction::decode(r#"{"action":"stop_process"}"#).unwrap().is_terminal());
		assert_eq!(
			Instruction::decode(r#"{"action":"start_typing","content":null}"#).unwrap(),
			Instruction::StartTyping(TypingPayload::default())
		);
		let role = r#"{"action":"add_role","content":{"user":{"id":1,"username":"ana"},"role":"member"}}"#;
		assert_eq!(Instruction::decode(role).unwrap().tag(), "add_role");
	}

	#[test]
	fn unknown_action_is_rejected() {
		match Instruction::decode(r#"{"action":"dance","content":{}}"#).unwrap_err() {
			DecodeError::UnknownAction(tag) => assert_eq!(tag, "dance"),
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn schema_violations_are_rejected() {
		let missing_field = r#"{"action":"image","content":{"caption":"x"}}"#;
		assert!(matches!(
			Instruction::decode(missing_field),
			Err(DecodeError::Payload { action: "image", .. })
		));

		let blank = r#"{"action":"message","content":{"message":"  "}}"#;
		assert!(matches!(
			Instruction::decode(blank),
			Err(DecodeError::Invalid { action: "message", .. })
		));
	}

	#[test]
	fn decode_list_keeps_per_item_results() {
		let body = r#"[
			{"action":"message","content":{"message":"one"}},
			{"action":"bogus"},
			{"action":"stop_process"}
		]"#;
		let items = Instruction::decode_list(body).unwrap();
		assert_eq!(items.len(), 3);
		assert!(items[0].is_ok());
		assert!(matches!(items[1], Err(DecodeError::UnknownAction(_))));
		assert!(matches!(items[2], Ok(Instruction::StopProcess)));
	}

	#[test]
	fn decode_list_accepts_single_object_and_empty_body() {
		let items = Instruction::decode_list(r#"{"action":"stop_typing"}"#).unwrap();
		assert_eq!(items.len(), 1);
		assert!(Instruction::decode_list("  ").unwrap().is_empty());
		assert!(Instruction::decode_list("null").unwrap().is_empty());
		assert!(Instruction::decode_list("[1,").is_err());
	}

	#[test]
	fn to_frame_decodes_to_same_instruction() {
		let instruction = Instruction::Message(MessagePayload {
			user: None,
			channel: None,
			message: "hi".to_string(),
			buttons: vec![],
			delete_after: Some(5),
		});
		let frame = instruction.to_frame().unwrap();
		assert_eq!(Instruction::decode(&frame).unwrap(), instruction);
	}
}
