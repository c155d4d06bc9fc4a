#![forbid(unsafe_code)]

mod ws;

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream};
use ikigai_domain::UserId;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::TransportError;

pub use ws::{BackendWs, WsConnector, WsTransport};

/// Write half of a backend connection; accepts JSON text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Read half of a backend connection. Ends (or yields an error) when the transport goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens one bidirectional connection per user.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	async fn open(&self, user: &UserId) -> Result<(FrameSink, FrameStream), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Connecting,
	Open,
	Closed,
}

/// Transport handle owned by the registry for exactly one user.
pub struct Connection {
	id: u64,
	user: UserId,
	state: Mutex<ConnectionState>,
	sink: tokio::sync::Mutex<FrameSink>,
	reader: Mutex<Option<AbortHandle>>,
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("id", &self.id)
			.field("user", &self.user)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Connection {
	pub(crate) fn new(id: u64, user: UserId, sink: FrameSink) -> Self {
		Self {
			id,
			user,
			state: Mutex::new(ConnectionState::Open),
			sink: tokio::sync::Mutex::new(sink),
			reader: Mutex::new(None),
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn user(&self) -> &UserId {
		&self.user
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.lock()
	}

	pub fn is_closed(&self) -> bool {
		self.state() == ConnectionState::Closed
	}

	pub(crate) fn mark_closed(&self) {
		*self.state.lock() = ConnectionState::Closed;
	}

	pub(crate) fn attach_reader(&self, reader: AbortHandle) {
		*self.reader.lock() = Some(reader);
	}

	/// Abort the receive loop, if one is attached.
	pub(crate) fn stop_reader(&self) {
		if let Some(reader) = self.reader.lock().take() {
			reader.abort();
		}
	}

	/// Send one frame. Concurrent callers are serialized in arrival order.
	pub async fn send(&self, frame: String) -> Result<(), TransportError> {
		if self.is_closed() {
			return Err(TransportError::Closed);
		}

		let mut sink = self.sink.lock().await;
		// Re-check: the receive loop may have closed us while we waited for the sink.
		if self.is_closed() {
			return Err(TransportError::Closed);
		}

		let res = sink.send(frame).await;
		if matches!(res, Err(TransportError::Closed)) {
			self.mark_closed();
		}
		res
	}

	/// Close the write half, giving up after `timeout`.
	pub async fn close(&self, timeout: Duration) {
		self.mark_closed();
		let closing = async {
			let mut sink = self.sink.lock().await;
			sink.close().await
		};
		match tokio::time::timeout(timeout, closing).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => debug!(user = %self.user, connection_id = self.id, error = %e, "close failed"),
			Err(_) => debug!(user = %self.user, connection_id = self.id, "close timed out"),
		}
	}
}
