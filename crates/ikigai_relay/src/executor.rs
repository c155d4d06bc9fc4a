#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ikigai_domain::UserId;
use ikigai_protocol::{Button, ImagePayload, Instruction, MessagePayload};
use tracing::{debug, info, warn};

use crate::channel::{Channel, Choice, DeliveryOutcome, SentHandle};
use crate::config::{DEFAULT_PLACEHOLDER_CONTENT, DEFAULT_STICKER_EXTENSION};
use crate::error::RelayError;
use crate::queue::InstructionHandler;

/// Choices the channel renders on a single message.
pub const MAX_CHOICES_PER_MESSAGE: usize = 3;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
	pub ack_timeout: Duration,
	/// Body of follow-up messages that only carry extra choices.
	pub placeholder_content: String,
	/// Extension of the pre-converted sticker that replaces a GIF.
	pub sticker_extension: String,
}

impl Default for ExecutorConfig {
	fn default() -> Self {
		Self {
			ack_timeout: Duration::from_secs(10),
			placeholder_content: DEFAULT_PLACEHOLDER_CONTENT.to_string(),
			sticker_extension: DEFAULT_STICKER_EXTENSION.to_string(),
		}
	}
}

/// One channel send, as planned from an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
	Text {
		text: String,
		choices: Vec<Choice>,
	},
	Image {
		resource: String,
		caption: Option<String>,
		choices: Vec<Choice>,
	},
	Sticker {
		resource: String,
	},
}

impl Delivery {
	pub fn choices(&self) -> &[Choice] {
		match self {
			Delivery::Text { choices, .. } | Delivery::Image { choices, .. } => choices,
			Delivery::Sticker { .. } => &[],
		}
	}
}

fn choice_groups(buttons: &[Button]) -> impl Iterator<Item = Vec<Choice>> + '_ {
	buttons
		.chunks(MAX_CHOICES_PER_MESSAGE)
		.map(|group| group.iter().map(Choice::from).collect())
}

/// Text plus buttons: the first group rides on the text, the rest on placeholder messages.
pub fn plan_message(payload: &MessagePayload, placeholder: &str) -> Vec<Delivery> {
	let mut groups = choice_groups(&payload.buttons);

	let text = if payload.message.trim().is_empty() {
		placeholder.to_string()
	} else {
		payload.message.clone()
	};
	let mut plan = vec![Delivery::Text {
		text,
		choices: groups.next().unwrap_or_default(),
	}];
	plan.extend(groups.map(|choices| Delivery::Text {
		text: placeholder.to_string(),
		choices,
	}));
	plan
}

/// Image plus buttons, or a sticker when the image is a GIF.
pub fn plan_image(payload: &ImagePayload, placeholder: &str, sticker_extension: &str) -> Vec<Delivery> {
	if let Some(resource) = sticker_resource(&payload.image, sticker_extension) {
		return vec![Delivery::Sticker { resource }];
	}

	let mut groups = choice_groups(&payload.buttons);
	let mut plan = vec![Delivery::Image {
		resource: payload.image.clone(),
		caption: payload.caption.clone().filter(|c| !c.trim().is_empty()),
		choices: groups.next().unwrap_or_default(),
	}];
	plan.extend(groups.map(|choices| Delivery::Text {
		text: placeholder.to_string(),
		choices,
	}));
	plan
}

/// `media/wave.gif` → `media/wave.webp`; `None` for anything that is not a GIF.
pub fn sticker_resource(path: &str, sticker_extension: &str) -> Option<String> {
	let (stem, ext) = path.rsplit_once('.')?;
	if !ext.eq_ignore_ascii_case("gif") || stem.is_empty() || stem.ends_with('/') {
		return None;
	}
	Some(format!("{stem}.{}", sticker_extension.trim_start_matches('.')))
}

/// Turns instructions into channel sends. Every send waits for its delivery receipt (bounded by
/// the ack timeout) before the next one starts.
pub struct ActionExecutor {
	channel: Arc<dyn Channel>,
	cfg: ExecutorConfig,
}

impl std::fmt::Debug for ActionExecutor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ActionExecutor").field("cfg", &self.cfg).finish_non_exhaustive()
	}
}

impl ActionExecutor {
	pub fn new(channel: Arc<dyn Channel>, cfg: ExecutorConfig) -> Self {
		Self { channel, cfg }
	}

	pub async fn execute(&self, user: &UserId, instruction: Instruction) -> Result<(), RelayError> {
		instruction.validate()?;

		match instruction {
			Instruction::Message(payload) => {
				let plan = plan_message(&payload, &self.cfg.placeholder_content);
				self.deliver_all(user, Instruction::MESSAGE, plan).await
			}
			Instruction::Image(payload) => {
				let plan = plan_image(&payload, &self.cfg.placeholder_content, &self.cfg.sticker_extension);
				if matches!(plan.first(), Some(Delivery::Sticker { .. }))
					&& (payload.caption.is_some() || !payload.buttons.is_empty())
				{
					warn!(
						user = %user,
						image = %payload.image,
						buttons = payload.buttons.len(),
						"gif sent as sticker; dropping caption and buttons"
					);
				}
				self.deliver_all(user, Instruction::IMAGE, plan).await
			}
			Instruction::AddRole(payload) | Instruction::RemoveRole(payload) => {
				debug!(user = %user, role = %payload.role, "role changes are not supported on this channel");
				Ok(())
			}
			Instruction::StartTyping(_) | Instruction::StopTyping(_) => {
				debug!(user = %user, "typing indicators are not supported on this channel");
				Ok(())
			}
			Instruction::StopProcess => {
				info!(user = %user, "stop_process received");
				Ok(())
			}
		}
	}

	async fn deliver_all(&self, user: &UserId, action: &'static str, plan: Vec<Delivery>) -> Result<(), RelayError> {
		let total = plan.len();
		for (idx, delivery) in plan.into_iter().enumerate() {
			let handle = self.send(user, &delivery).await.map_err(|e| {
				metrics::counter!("ikigai_relay_channel_send_failures_total").increment(1);
				RelayError::HandlerFailure {
					action,
					detail: format!("send {} of {total}: {e}", idx + 1),
				}
			})?;
			self.await_delivery(user, action, &handle).await;
		}
		Ok(())
	}

	async fn send(&self, user: &UserId, delivery: &Delivery) -> Result<SentHandle, crate::ChannelError> {
		match delivery {
			Delivery::Text { text, choices } => self.channel.send_text(user, text, choices).await,
			Delivery::Image {
				resource,
				caption,
				choices,
			} => {
				self.channel
					.send_image(user, resource, caption.as_deref(), choices)
					.await
			}
			Delivery::Sticker { resource } => self.channel.send_sticker(user, resource).await,
		}
	}

	async fn await_delivery(&self, user: &UserId, action: &'static str, handle: &SentHandle) {
		match self.channel.wait_for_delivery(handle, self.cfg.ack_timeout).await {
			DeliveryOutcome::Delivered => {
				debug!(user = %user, action, message_id = %handle.message_id, "delivery confirmed");
			}
			DeliveryOutcome::TimedOut => {
				metrics::counter!("ikigai_relay_delivery_timeouts_total").increment(1);
				let err = RelayError::DeliveryTimeout(self.cfg.ack_timeout);
				warn!(user = %user, action, message_id = %handle.message_id, error = %err, "proceeding without delivery receipt");
			}
			DeliveryOutcome::Failed(reason) => {
				metrics::counter!("ikigai_relay_delivery_failures_total").increment(1);
				warn!(user = %user, action, message_id = %handle.message_id, reason = %reason, "channel reported delivery failure");
			}
		}
	}
}

#[async_trait]
impl InstructionHandler for ActionExecutor {
	async fn handle(&self, user: &UserId, instruction: Instruction) -> Result<(), RelayError> {
		self.execute(user, instruction).await
	}
}
