#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use ikigai_domain::ChannelMessageId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::channel::DeliveryOutcome;

/// Remembered receipts that arrived before anyone waited on them.
pub const DEFAULT_EARLY_RECEIPTS_CAPACITY: usize = 1024;

/// Matches delivery receipts to pending waits by channel message id.
///
/// Receipts can beat the send response (the webhook races the API call), so unmatched receipts
/// are kept in a bounded buffer and consumed by the next wait for that id.
#[derive(Debug)]
pub struct DeliveryTracker {
	inner: Mutex<Inner>,
	early_capacity: usize,
}

#[derive(Debug, Default)]
struct Inner {
	waiters: HashMap<ChannelMessageId, Vec<oneshot::Sender<DeliveryOutcome>>>,
	early: HashMap<ChannelMessageId, DeliveryOutcome>,
	early_order: VecDeque<ChannelMessageId>,
}

impl Default for DeliveryTracker {
	fn default() -> Self {
		Self::new(DEFAULT_EARLY_RECEIPTS_CAPACITY)
	}
}

impl DeliveryTracker {
	pub fn new(early_capacity: usize) -> Self {
		Self {
			inner: Mutex::new(Inner::default()),
			early_capacity: early_capacity.max(1),
		}
	}

	pub fn confirm(&self, id: &ChannelMessageId) -> bool {
		self.resolve(id, DeliveryOutcome::Delivered)
	}

	pub fn fail(&self, id: &ChannelMessageId, reason: impl Into<String>) -> bool {
		self.resolve(id, DeliveryOutcome::Failed(reason.into()))
	}

	/// Wake everyone waiting on `id`. Returns `false` when nobody was waiting (the receipt is kept).
	pub fn resolve(&self, id: &ChannelMessageId, outcome: DeliveryOutcome) -> bool {
		let mut inner = self.inner.lock();

		if let Some(waiters) = inner.waiters.remove(id) {
			let mut woke = false;
			for tx in waiters {
				woke |= tx.send(outcome.clone()).is_ok();
			}
			if woke {
				return true;
			}
		}

		if !inner.early.contains_key(id) {
			inner.early.insert(id.clone(), outcome);
			inner.early_order.push_back(id.clone());
			while inner.early_order.len() > self.early_capacity {
				if let Some(old) = inner.early_order.pop_front() {
					inner.early.remove(&old);
				}
			}
		}
		false
	}

	pub async fn wait(&self, id: &ChannelMessageId, timeout: Duration) -> DeliveryOutcome {
		let rx = {
			let mut inner = self.inner.lock();
			if let Some(outcome) = inner.early.remove(id) {
				inner.early_order.retain(|x| x != id);
				return outcome;
			}
			let (tx, rx) = oneshot::channel();
			inner.waiters.entry(id.clone()).or_default().push(tx);
			rx
		};

		let outcome = match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) | Err(_) => DeliveryOutcome::TimedOut,
		};

		if outcome == DeliveryOutcome::TimedOut {
			let mut inner = self.inner.lock();
			if let Some(waiters) = inner.waiters.get_mut(id) {
				waiters.retain(|tx| !tx.is_closed());
				if waiters.is_empty() {
					inner.waiters.remove(id);
				}
			}
			debug!(message_id = %id, ?timeout, "delivery wait timed out");
		}
		outcome
	}

	pub fn pending(&self) -> usize {
		self.inner.lock().waiters.values().map(Vec::len).sum()
	}
}
