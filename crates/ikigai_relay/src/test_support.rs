#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use futures::channel::mpsc as fmpsc;
use ikigai_domain::{ChannelMessageId, UserId};
use ikigai_protocol::{Button, Instruction, MessagePayload};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelError, Choice, DeliveryOutcome, SentHandle};
use crate::error::{RelayError, TransportError};
use crate::queue::{InstructionHandler, InstructionSink};
use crate::transport::{FrameSink, FrameStream, Transport};

pub(crate) fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

pub(crate) fn text(message: &str) -> Instruction {
	Instruction::Message(MessagePayload {
		user: None,
		channel: None,
		message: message.to_string(),
		buttons: Vec::new(),
		delete_after: None,
	})
}

pub(crate) fn buttons(n: usize) -> Vec<Button> {
	(0..n)
		.map(|i| Button {
			id: i as i64,
			custom_id: format!("b{i}"),
			style: 1,
			label: format!("Button {i}"),
			clicked: false,
			remove_after_click: false,
		})
		.collect()
}

/// Poll `cond` until it holds or `timeout` elapses.
pub(crate) async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		if cond() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	cond()
}

/// Backend side of an in-memory connection.
pub(crate) struct MemoryPeer {
	/// Frames the relay sent.
	pub frames: fmpsc::UnboundedReceiver<String>,
	/// Frames (or errors) for the relay's receive loop. Dropping it ends the stream.
	pub inbound: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryOptions {
	pub open_delay: Duration,
	/// Every opened connection rejects sends as closed.
	pub dead_sinks: bool,
	/// The first `n` opens fail.
	pub failing_opens: usize,
}

pub(crate) struct MemoryTransport {
	opts: MemoryOptions,
	opens: AtomicUsize,
	peers: mpsc::UnboundedSender<(UserId, MemoryPeer)>,
}

impl MemoryTransport {
	pub(crate) fn new(opts: MemoryOptions) -> (Arc<Self>, mpsc::UnboundedReceiver<(UserId, MemoryPeer)>) {
		let (peers, peers_rx) = mpsc::unbounded_channel();
		(
			Arc::new(Self {
				opts,
				opens: AtomicUsize::new(0),
				peers,
			}),
			peers_rx,
		)
	}

	pub(crate) fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	async fn open(&self, user: &UserId) -> Result<(FrameSink, FrameStream), TransportError> {
		let n = self.opens.fetch_add(1, Ordering::SeqCst);
		if !self.opts.open_delay.is_zero() {
			tokio::time::sleep(self.opts.open_delay).await;
		}
		if n < self.opts.failing_opens {
			return Err(TransportError::other("connection refused"));
		}

		let (frames_tx, frames_rx) = fmpsc::unbounded::<String>();
		let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<String, TransportError>>();

		let peer = MemoryPeer {
			frames: frames_rx,
			inbound: inbound_tx,
		};
		if self.opts.dead_sinks {
			let MemoryPeer { frames, inbound } = peer;
			drop(frames);
			let _ = self.peers.send((
				user.clone(),
				MemoryPeer {
					frames: fmpsc::unbounded::<String>().1,
					inbound,
				},
			));
		} else {
			let _ = self.peers.send((user.clone(), peer));
		}

		let sink = frames_tx.sink_map_err(|_| TransportError::Closed);
		Ok((Box::pin(sink), Box::pin(inbound_rx)))
	}
}

/// Captures what the dispatcher hands to the queue layer.
pub(crate) struct RecordingSink {
	tx: mpsc::UnboundedSender<(UserId, Instruction)>,
}

impl RecordingSink {
	pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(UserId, Instruction)>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Arc::new(Self { tx }), rx)
	}
}

impl InstructionSink for RecordingSink {
	fn add_response_to_queue(&self, user: &UserId, instruction: Instruction) {
		let _ = self.tx.send((user.clone(), instruction));
	}
}

/// Handler that records `(user, label)` and can be told to stall, fail or panic.
///
/// Labels are the message text for `Message` instructions and the action tag otherwise.
#[derive(Default)]
pub(crate) struct RecordingHandler {
	pub log: Mutex<Vec<(UserId, String)>>,
	pub delays: Mutex<HashMap<String, Duration>>,
	active: Mutex<HashMap<UserId, usize>>,
	pub max_active: Mutex<HashMap<UserId, usize>>,
}

impl RecordingHandler {
	pub(crate) fn labels(&self, user: &UserId) -> Vec<String> {
		self.log
			.lock()
			.iter()
			.filter(|(u, _)| u == user)
			.map(|(_, l)| l.clone())
			.collect()
	}

	pub(crate) fn delay(&self, label: &str, d: Duration) {
		self.delays.lock().insert(label.to_string(), d);
	}
}

#[async_trait]
impl InstructionHandler for RecordingHandler {
	async fn handle(&self, user: &UserId, instruction: Instruction) -> Result<(), RelayError> {
		let label = match &instruction {
			Instruction::Message(p) => p.message.clone(),
			other => other.tag().to_string(),
		};

		{
			let mut active = self.active.lock();
			let n = active.entry(user.clone()).or_default();
			*n += 1;
			let mut max = self.max_active.lock();
			let m = max.entry(user.clone()).or_default();
			*m = (*m).max(*n);
		}

		let delay = self.delays.lock().get(&label).copied();
		if let Some(d) = delay {
			tokio::time::sleep(d).await;
		}

		self.log.lock().push((user.clone(), label.clone()));
		if let Some(n) = self.active.lock().get_mut(user) {
			*n -= 1;
		}

		match label.as_str() {
			"fail" => Err(RelayError::HandlerFailure {
				action: "message",
				detail: "asked to fail".to_string(),
			}),
			"panic" => panic!("asked to panic"),
			_ => Ok(()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelEvent {
	Text { text: String, choices: Vec<String> },
	Image { resource: String, caption: Option<String>, choices: Vec<String> },
	Sticker { resource: String },
	AckStart(String),
	AckEnd(String),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AckMode {
	Immediate,
	Delay(Duration),
	Never,
}

/// Channel that records sends and ack waits in one ordered log.
pub(crate) struct RecordingChannel {
	pub events: Mutex<Vec<ChannelEvent>>,
	ack: AckMode,
	fail_on_send: Option<usize>,
	sends: AtomicUsize,
}

impl RecordingChannel {
	pub(crate) fn new(ack: AckMode) -> Arc<Self> {
		Self::failing_on(ack, None)
	}

	/// The `n`th send (1-based) is rejected.
	pub(crate) fn failing_on(ack: AckMode, n: Option<usize>) -> Arc<Self> {
		Arc::new(Self {
			events: Mutex::new(Vec::new()),
			ack,
			fail_on_send: n,
			sends: AtomicUsize::new(0),
		})
	}

	pub(crate) fn events(&self) -> Vec<ChannelEvent> {
		self.events.lock().clone()
	}

	pub(crate) fn sent(&self) -> Vec<ChannelEvent> {
		self.events()
			.into_iter()
			.filter(|e| !matches!(e, ChannelEvent::AckStart(_) | ChannelEvent::AckEnd(_)))
			.collect()
	}

	pub(crate) fn sent_texts(&self) -> Vec<String> {
		self.sent()
			.into_iter()
			.filter_map(|e| match e {
				ChannelEvent::Text { text, .. } => Some(text),
				_ => None,
			})
			.collect()
	}

	fn record(&self, event: ChannelEvent) -> Result<SentHandle, ChannelError> {
		let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
		if self.fail_on_send == Some(n) {
			return Err(ChannelError::Rejected {
				status: 400,
				body: "rejected".to_string(),
			});
		}
		self.events.lock().push(event);
		Ok(SentHandle {
			message_id: ChannelMessageId::new(format!("wamid.{n}")).expect("message id"),
			sender: "bot".to_string(),
			recipient: "user".to_string(),
		})
	}
}

fn ids(choices: &[Choice]) -> Vec<String> {
	choices.iter().map(|c| c.custom_id.clone()).collect()
}

#[async_trait]
impl Channel for RecordingChannel {
	async fn send_text(&self, _user: &UserId, text: &str, choices: &[Choice]) -> Result<SentHandle, ChannelError> {
		self.record(ChannelEvent::Text {
			text: text.to_string(),
			choices: ids(choices),
		})
	}

	async fn send_image(
		&self,
		_user: &UserId,
		resource: &str,
		caption: Option<&str>,
		choices: &[Choice],
	) -> Result<SentHandle, ChannelError> {
		self.record(ChannelEvent::Image {
			resource: resource.to_string(),
			caption: caption.map(str::to_string),
			choices: ids(choices),
		})
	}

	async fn send_sticker(&self, _user: &UserId, resource: &str) -> Result<SentHandle, ChannelError> {
		self.record(ChannelEvent::Sticker {
			resource: resource.to_string(),
		})
	}

	async fn wait_for_delivery(&self, handle: &SentHandle, timeout: Duration) -> DeliveryOutcome {
		let id = handle.message_id.to_string();
		self.events.lock().push(ChannelEvent::AckStart(id.clone()));
		let outcome = match self.ack {
			AckMode::Immediate => DeliveryOutcome::Delivered,
			AckMode::Delay(d) if d < timeout => {
				tokio::time::sleep(d).await;
				DeliveryOutcome::Delivered
			}
			AckMode::Delay(_) | AckMode::Never => {
				tokio::time::sleep(timeout).await;
				DeliveryOutcome::TimedOut
			}
		};
		self.events.lock().push(ChannelEvent::AckEnd(id));
		outcome
	}
}
