#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use ikigai_domain::UserId;
use ikigai_protocol::Instruction;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;

/// Applies one instruction for one user.
#[async_trait]
pub trait InstructionHandler: Send + Sync + 'static {
	async fn handle(&self, user: &UserId, instruction: Instruction) -> Result<(), RelayError>;
}

/// Where the inbound side delivers decoded instructions.
pub trait InstructionSink: Send + Sync + 'static {
	fn add_response_to_queue(&self, user: &UserId, instruction: Instruction);
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
	/// Log a warning each time a queue's depth reaches a multiple of this value.
	pub warn_depth: usize,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self { warn_depth: 256 }
	}
}

struct WorkerSlot {
	id: u64,
	tx: mpsc::UnboundedSender<Instruction>,
	depth: Arc<AtomicUsize>,
	task: JoinHandle<()>,
}

struct Shared {
	handler: Arc<dyn InstructionHandler>,
	cfg: QueueConfig,
	workers: Mutex<HashMap<UserId, WorkerSlot>>,
	next_id: AtomicU64,
}

/// Per-user FIFO queues, each drained by exactly one worker task.
///
/// Queues are created on the first instruction for a user and torn down by `stop_process`.
/// Enqueueing happens under the map lock, which is what keeps teardown and recreation ordered.
#[derive(Clone)]
pub struct InstructionQueues {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for InstructionQueues {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InstructionQueues")
			.field("workers", &self.len())
			.field("cfg", &self.shared.cfg)
			.finish_non_exhaustive()
	}
}

impl InstructionQueues {
	pub fn new(handler: Arc<dyn InstructionHandler>, cfg: QueueConfig) -> Self {
		Self {
			shared: Arc::new(Shared {
				handler,
				cfg,
				workers: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
			}),
		}
	}

	/// Enqueue `instruction` for `user`, starting the user's worker if needed.
	pub fn add_response_to_queue(&self, user: &UserId, instruction: Instruction) {
		self.shared.enqueue(user, instruction);
	}

	pub fn has_worker(&self, user: &UserId) -> bool {
		self.shared.workers.lock().contains_key(user)
	}

	/// Instructions waiting (not yet picked up) for `user`.
	pub fn queue_depth(&self, user: &UserId) -> usize {
		self.shared
			.workers
			.lock()
			.get(user)
			.map_or(0, |slot| slot.depth.load(Ordering::Relaxed))
	}

	pub fn len(&self) -> usize {
		self.shared.workers.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Close every queue, let workers drain for up to `grace`, then abort the stragglers.
	pub async fn shutdown(&self, grace: Duration) {
		let slots: Vec<(UserId, WorkerSlot)> = self.shared.workers.lock().drain().collect();
		if slots.is_empty() {
			return;
		}
		info!(workers = slots.len(), "stopping instruction workers");

		let deadline = tokio::time::Instant::now() + grace;
		for (user, slot) in slots {
			let WorkerSlot { tx, mut task, .. } = slot;
			drop(tx);
			if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
				warn!(user = %user, "worker did not drain in time; aborting");
				task.abort();
			}
		}
	}
}

impl InstructionSink for InstructionQueues {
	fn add_response_to_queue(&self, user: &UserId, instruction: Instruction) {
		InstructionQueues::add_response_to_queue(self, user, instruction);
	}
}

impl Shared {
	fn enqueue(self: &Arc<Self>, user: &UserId, instruction: Instruction) {
		let mut workers = self.workers.lock();

		let slot = workers
			.entry(user.clone())
			.or_insert_with(|| self.spawn_worker(user.clone(), Vec::new()));
		if slot.tx.is_closed() {
			// Worker died without retiring (aborted or panicked outside the handler).
			warn!(user = %user, worker_id = slot.id, "replacing dead instruction worker");
			*slot = self.spawn_worker(user.clone(), Vec::new());
		}

		let depth = slot.depth.fetch_add(1, Ordering::Relaxed) + 1;
		if let Err(mpsc::error::SendError(instruction)) = slot.tx.send(instruction) {
			slot.depth.fetch_sub(1, Ordering::Relaxed);
			*slot = self.spawn_worker(user.clone(), vec![instruction]);
		}
		metrics::counter!("ikigai_relay_instructions_enqueued_total").increment(1);
		metrics::gauge!("ikigai_relay_queued_instructions").increment(1.0);

		let warn_depth = self.cfg.warn_depth;
		if warn_depth > 0 && depth % warn_depth == 0 {
			warn!(user = %user, depth, "instruction queue is growing");
		}
	}

	// Caller holds the workers lock.
	fn spawn_worker(self: &Arc<Self>, user: UserId, backlog: Vec<Instruction>) -> WorkerSlot {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::unbounded_channel();
		let depth = Arc::new(AtomicUsize::new(0));

		for instruction in backlog {
			depth.fetch_add(1, Ordering::Relaxed);
			let _ = tx.send(instruction);
		}

		let worker = Worker {
			id,
			user: user.clone(),
			handler: self.handler.clone(),
			shared: Arc::downgrade(self),
			depth: depth.clone(),
		};
		let task = tokio::spawn(worker.run(rx));

		metrics::counter!("ikigai_relay_workers_started_total").increment(1);
		debug!(user = %user, worker_id = id, "instruction worker started");

		WorkerSlot { id, tx, depth, task }
	}

	/// Tear down the user's queue after `stop_process`.
	///
	/// Anything enqueued behind the terminal instruction moves to a fresh worker. Doing this under
	/// the map lock keeps it ahead of later `add_response_to_queue` calls.
	fn retire(self: &Arc<Self>, user: &UserId, worker_id: u64, rx: &mut mpsc::UnboundedReceiver<Instruction>) {
		let mut workers = self.workers.lock();
		if workers.get(user).is_some_and(|slot| slot.id == worker_id) {
			workers.remove(user);
		}

		rx.close();
		let mut backlog = Vec::new();
		while let Ok(instruction) = rx.try_recv() {
			backlog.push(instruction);
		}

		metrics::counter!("ikigai_relay_workers_stopped_total").increment(1);
		if backlog.is_empty() {
			info!(user = %user, worker_id, "instruction queue torn down");
			return;
		}

		metrics::gauge!("ikigai_relay_queued_instructions").decrement(backlog.len() as f64);
		info!(user = %user, worker_id, carried = backlog.len(), "instruction queue torn down; restarting for backlog");
		if workers.contains_key(user) {
			for instruction in backlog {
				self.enqueue_locked(&mut workers, user, instruction);
			}
		} else {
			let count = backlog.len() as f64;
			let slot = self.spawn_worker(user.clone(), backlog);
			metrics::gauge!("ikigai_relay_queued_instructions").increment(count);
			workers.insert(user.clone(), slot);
		}
	}

	fn enqueue_locked(
		self: &Arc<Self>,
		workers: &mut HashMap<UserId, WorkerSlot>,
		user: &UserId,
		instruction: Instruction,
	) {
		if let Some(slot) = workers.get_mut(user) {
			slot.depth.fetch_add(1, Ordering::Relaxed);
			if slot.tx.send(instruction).is_ok() {
				metrics::gauge!("ikigai_relay_queued_instructions").increment(1.0);
				return;
			}
			slot.depth.fetch_sub(1, Ordering::Relaxed);
		}
		warn!(user = %user, "dropping instruction: no live worker to carry it");
	}
}

struct Worker {
	id: u64,
	user: UserId,
	handler: Arc<dyn InstructionHandler>,
	shared: Weak<Shared>,
	depth: Arc<AtomicUsize>,
}

impl Worker {
	async fn run(self, mut rx: mpsc::UnboundedReceiver<Instruction>) {
		metrics::gauge!("ikigai_relay_workers_active").increment(1.0);

		while let Some(instruction) = rx.recv().await {
			self.depth.fetch_sub(1, Ordering::Relaxed);
			metrics::gauge!("ikigai_relay_queued_instructions").decrement(1.0);

			let action = instruction.tag();
			let terminal = instruction.is_terminal();

			match AssertUnwindSafe(self.handler.handle(&self.user, instruction))
				.catch_unwind()
				.await
			{
				Ok(Ok(())) => {
					metrics::counter!("ikigai_relay_instructions_processed_total").increment(1);
				}
				Ok(Err(e)) => {
					metrics::counter!("ikigai_relay_instructions_failed_total").increment(1);
					warn!(user = %self.user, action, error = %e, "instruction failed");
				}
				Err(_) => {
					metrics::counter!("ikigai_relay_instructions_failed_total").increment(1);
					error!(user = %self.user, action, "instruction handler panicked");
				}
			}

			if terminal {
				if let Some(shared) = self.shared.upgrade() {
					shared.retire(&self.user, self.id, &mut rx);
				}
				break;
			}
		}

		metrics::gauge!("ikigai_relay_workers_active").decrement(1.0);
		debug!(user = %self.user, worker_id = self.id, "instruction worker exited");
	}
}
