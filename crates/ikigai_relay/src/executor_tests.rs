#![forbid(unsafe_code)]

use std::time::Duration;

use ikigai_protocol::{BackendUser, ImagePayload, Instruction, MessagePayload, RolePayload, TypingPayload};
use proptest::prelude::*;

use crate::error::RelayError;
use crate::executor::{ActionExecutor, Delivery, ExecutorConfig, MAX_CHOICES_PER_MESSAGE, plan_message, sticker_resource};
use crate::test_support::{AckMode, ChannelEvent, RecordingChannel, buttons, user};

fn message(text: &str, n_buttons: usize) -> Instruction {
	Instruction::Message(MessagePayload {
		user: None,
		channel: None,
		message: text.to_string(),
		buttons: buttons(n_buttons),
		delete_after: None,
	})
}

fn image(path: &str, caption: Option<&str>, n_buttons: usize) -> Instruction {
	Instruction::Image(ImagePayload {
		user: None,
		channel: None,
		image: path.to_string(),
		buttons: buttons(n_buttons),
		caption: caption.map(str::to_string),
		delete_after: None,
	})
}

fn cfg(ack_timeout: Duration) -> ExecutorConfig {
	ExecutorConfig {
		ack_timeout,
		..ExecutorConfig::default()
	}
}

fn ids(range: std::ops::Range<usize>) -> Vec<String> {
	range.map(|i| format!("b{i}")).collect()
}

#[tokio::test]
async fn seven_buttons_become_three_messages() {
	let channel = RecordingChannel::new(AckMode::Immediate);
	let exec = ActionExecutor::new(channel.clone(), ExecutorConfig::default());

	exec.execute(&user("1"), message("Pick one", 7)).await.expect("execute");

	assert_eq!(
		channel.sent(),
		vec![
			ChannelEvent::Text {
				text: "Pick one".into(),
				choices: ids(0..3),
			},
			ChannelEvent::Text {
				text: "More options:".into(),
				choices: ids(3..6),
			},
			ChannelEvent::Text {
				text: "More options:".into(),
				choices: ids(6..7),
			},
		]
	);
}

#[tokio::test]
async fn every_send_waits_for_its_receipt_before_the_next() {
	let channel = RecordingChannel::new(AckMode::Delay(Duration::from_millis(5)));
	let exec = ActionExecutor::new(channel.clone(), cfg(Duration::from_secs(1)));

	exec.execute(&user("1"), message("Pick one", 4)).await.expect("execute");

	let events = channel.events();
	assert_eq!(events.len(), 6);
	assert!(matches!(&events[0], ChannelEvent::Text { text, .. } if text == "Pick one"));
	assert_eq!(events[1], ChannelEvent::AckStart("wamid.1".into()));
	assert_eq!(events[2], ChannelEvent::AckEnd("wamid.1".into()));
	assert!(matches!(&events[3], ChannelEvent::Text { text, .. } if text == "More options:"));
	assert_eq!(events[4], ChannelEvent::AckStart("wamid.2".into()));
	assert_eq!(events[5], ChannelEvent::AckEnd("wamid.2".into()));
}

#[tokio::test]
async fn missing_receipt_is_soft() {
	let channel = RecordingChannel::new(AckMode::Never);
	let exec = ActionExecutor::new(channel.clone(), cfg(Duration::from_millis(20)));

	let started = tokio::time::Instant::now();
	exec.execute(&user("1"), message("Pick one", 4)).await.expect("timeouts are soft");

	assert_eq!(channel.sent().len(), 2);
	assert!(started.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn gif_is_sent_as_sticker_without_caption_or_buttons() {
	let channel = RecordingChannel::new(AckMode::Immediate);
	let exec = ActionExecutor::new(channel.clone(), ExecutorConfig::default());

	exec.execute(&user("1"), image("media/wave.gif", Some("hey"), 2))
		.await
		.expect("execute");

	assert_eq!(
		channel.sent(),
		vec![ChannelEvent::Sticker {
			resource: "media/wave.webp".into()
		}]
	);
}

#[tokio::test]
async fn image_with_five_buttons_adds_one_placeholder() {
	let channel = RecordingChannel::new(AckMode::Immediate);
	let exec = ActionExecutor::new(channel.clone(), ExecutorConfig::default());

	exec.execute(&user("1"), image("media/menu.png", Some("Menu"), 5))
		.await
		.expect("execute");

	assert_eq!(
		channel.sent(),
		vec![
			ChannelEvent::Image {
				resource: "media/menu.png".into(),
				caption: Some("Menu".into()),
				choices: ids(0..3),
			},
			ChannelEvent::Text {
				text: "More options:".into(),
				choices: ids(3..5),
			},
		]
	);
}

#[tokio::test]
async fn send_failure_aborts_the_rest_of_the_instruction() {
	let channel = RecordingChannel::failing_on(AckMode::Immediate, Some(2));
	let exec = ActionExecutor::new(channel.clone(), ExecutorConfig::default());

	let err = exec
		.execute(&user("1"), message("Pick one", 9))
		.await
		.expect_err("second send fails");

	match err {
		RelayError::HandlerFailure { action, detail } => {
			assert_eq!(action, "message");
			assert!(detail.starts_with("send 2 of 3"), "detail: {detail}");
		}
		other => panic!("unexpected error: {other:?}"),
	}
	assert_eq!(channel.sent_texts(), vec!["Pick one"]);
}

#[tokio::test]
async fn unsupported_actions_touch_nothing() {
	let channel = RecordingChannel::new(AckMode::Immediate);
	let exec = ActionExecutor::new(channel.clone(), ExecutorConfig::default());
	let u = user("1");

	let role = RolePayload {
		user: BackendUser {
			id: 7,
			username: "ana".into(),
			platform_ids: Default::default(),
		},
		guild: None,
		role: "vip".into(),
	};
	for instruction in [
		Instruction::AddRole(role.clone()),
		Instruction::RemoveRole(role),
		Instruction::StartTyping(TypingPayload::default()),
		Instruction::StopTyping(TypingPayload::default()),
		Instruction::StopProcess,
	] {
		exec.execute(&u, instruction).await.expect("no-op");
	}

	assert!(channel.events().is_empty());
}

#[tokio::test]
async fn invalid_payload_is_malformed() {
	let channel = RecordingChannel::new(AckMode::Immediate);
	let exec = ActionExecutor::new(channel.clone(), ExecutorConfig::default());

	let err = exec.execute(&user("1"), message("   ", 0)).await.expect_err("blank text");
	assert!(matches!(err, RelayError::MalformedInstruction(_)), "got {err:?}");

	let err = exec.execute(&user("1"), image("", None, 0)).await.expect_err("no image");
	assert!(matches!(err, RelayError::MalformedInstruction(_)), "got {err:?}");
	assert!(channel.events().is_empty());
}

#[test]
fn blank_text_with_buttons_uses_placeholder() {
	let Instruction::Message(payload) = message("", 2) else {
		unreachable!()
	};
	let plan = plan_message(&payload, "More options:");
	assert_eq!(plan.len(), 1);
	assert!(matches!(&plan[0], Delivery::Text { text, .. } if text == "More options:"));
}

#[test]
fn sticker_resource_only_matches_gifs() {
	assert_eq!(sticker_resource("a/b.GIF", "webp").as_deref(), Some("a/b.webp"));
	assert_eq!(sticker_resource("a/b.gif", ".webp").as_deref(), Some("a/b.webp"));
	assert_eq!(sticker_resource("a/b.png", "webp"), None);
	assert_eq!(sticker_resource("a/.gif", "webp"), None);
	assert_eq!(sticker_resource("gif", "webp"), None);
}

proptest! {
	#[test]
	fn batching_keeps_every_button_once_in_order(n in 0usize..40) {
		let Instruction::Message(payload) = message("hello", n) else {
			unreachable!()
		};
		let plan = plan_message(&payload, "More options:");

		let expected_batches = n.div_ceil(MAX_CHOICES_PER_MESSAGE).max(1);
		prop_assert_eq!(plan.len(), expected_batches);
		prop_assert!(plan.iter().all(|d| d.choices().len() <= MAX_CHOICES_PER_MESSAGE));

		let flattened: Vec<String> = plan
			.iter()
			.flat_map(|d| d.choices().iter().map(|c| c.custom_id.clone()))
			.collect();
		prop_assert_eq!(flattened, ids(0..n));

		prop_assert!(matches!(&plan[0], Delivery::Text { text, .. } if text == "hello"), "plan[0] is not Text \"hello\"");
		for d in &plan[1..] {
			prop_assert!(matches!(d, Delivery::Text { text, .. } if text == "More options:"), "delivery is not Text \"More options:\"");
		}
	}
}
