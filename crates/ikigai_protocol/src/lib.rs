#![forbid(unsafe_code)]

//! Backend wire types.
//!
//! Every frame exchanged with the backend is a JSON object `{"action": <tag>, "content": <payload>}`.
//! Outbound frames carry [`OutboundEvent`]s produced on the channel side; inbound frames decode into
//! the closed [`Instruction`] taxonomy.

pub mod envelope;
pub mod event;
pub mod instruction;

pub use envelope::{DEFAULT_MAX_FRAME_SIZE, DecodeError, Envelope, RawEnvelope};
pub use event::{EventUser, OutboundEvent, serialize_event};
pub use instruction::{
	BackendChannel, BackendGuild, BackendUser, Button, ImagePayload, Instruction, MessagePayload, RolePayload,
	TypingPayload,
};

/// Outbound action tags.
pub mod actions {
	pub const MESSAGE: &str = "message";
	pub const BUTTON_CLICK: &str = "button_click";
}
