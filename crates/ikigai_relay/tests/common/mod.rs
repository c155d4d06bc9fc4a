#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ikigai_domain::{ChannelMessageId, UserId};
use ikigai_relay::{Channel, ChannelError, Choice, DeliveryOutcome, SentHandle};
use parking_lot::Mutex;

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("IKIGAI_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

pub fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid user id")
}

pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		if cond() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	cond()
}

/// Channel that confirms every send immediately and remembers `(user, text)`.
#[derive(Default)]
pub struct MemoryChannel {
	pub texts: Mutex<Vec<(UserId, String)>>,
	sends: AtomicUsize,
}

impl MemoryChannel {
	pub fn texts_for(&self, user: &UserId) -> Vec<String> {
		self.texts
			.lock()
			.iter()
			.filter(|(u, _)| u == user)
			.map(|(_, t)| t.clone())
			.collect()
	}

	fn handle(&self, user: &UserId) -> SentHandle {
		let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
		SentHandle {
			message_id: ChannelMessageId::new(format!("wamid.{n}")).expect("message id"),
			sender: "bot".to_string(),
			recipient: user.to_string(),
		}
	}
}

#[async_trait]
impl Channel for MemoryChannel {
	async fn send_text(&self, user: &UserId, text: &str, _choices: &[Choice]) -> Result<SentHandle, ChannelError> {
		self.texts.lock().push((user.clone(), text.to_string()));
		Ok(self.handle(user))
	}

	async fn send_image(
		&self,
		user: &UserId,
		resource: &str,
		_caption: Option<&str>,
		_choices: &[Choice],
	) -> Result<SentHandle, ChannelError> {
		self.texts.lock().push((user.clone(), format!("[image {resource}]")));
		Ok(self.handle(user))
	}

	async fn send_sticker(&self, user: &UserId, resource: &str) -> Result<SentHandle, ChannelError> {
		self.texts.lock().push((user.clone(), format!("[sticker {resource}]")));
		Ok(self.handle(user))
	}

	async fn wait_for_delivery(&self, _handle: &SentHandle, _timeout: Duration) -> DeliveryOutcome {
		DeliveryOutcome::Delivered
	}
}
