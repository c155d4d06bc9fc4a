#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ikigai_domain::UserId;
use ikigai_protocol::DEFAULT_MAX_FRAME_SIZE;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dispatcher::InboundDispatcher;
use crate::error::{RelayError, TransportError};
use crate::queue::InstructionSink;
use crate::transport::{Connection, ConnectionState, Transport};

/// Reconnect attempts after a send hits a closed connection.
pub const MAX_SEND_RETRIES: u32 = 1;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
	pub close_timeout: Duration,
	pub max_frame_size: usize,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			close_timeout: Duration::from_secs(10),
			max_frame_size: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

type CreationLock = Arc<tokio::sync::Mutex<()>>;

/// One backend connection per user, created lazily.
///
/// Creation for a given user is serialized by a per-user lock and the map is re-checked under it,
/// so racing first calls open exactly one connection. Different users never contend.
pub struct ConnectionRegistry {
	transport: Arc<dyn Transport>,
	dispatcher: InboundDispatcher,
	cfg: RegistryConfig,
	connections: Mutex<HashMap<UserId, Arc<Connection>>>,
	creation_locks: Mutex<HashMap<UserId, CreationLock>>,
	next_id: AtomicU64,
}

impl std::fmt::Debug for ConnectionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionRegistry")
			.field("connections", &self.len())
			.field("cfg", &self.cfg)
			.finish_non_exhaustive()
	}
}

impl ConnectionRegistry {
	pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn InstructionSink>, cfg: RegistryConfig) -> Arc<Self> {
		Arc::new(Self {
			transport,
			dispatcher: InboundDispatcher::new(sink, cfg.max_frame_size),
			cfg,
			connections: Mutex::new(HashMap::new()),
			creation_locks: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
		})
	}

	/// Tracked connection for `user`, if any.
	pub fn current(&self, user: &UserId) -> Option<Arc<Connection>> {
		self.connections.lock().get(user).cloned()
	}

	/// `Open` when tracked, `Connecting` while a creation is in flight.
	pub fn state(&self, user: &UserId) -> Option<ConnectionState> {
		if let Some(conn) = self.current(user) {
			return Some(conn.state());
		}
		let locks = self.creation_locks.lock();
		match locks.get(user) {
			Some(lock) if lock.try_lock().is_err() => Some(ConnectionState::Connecting),
			_ => None,
		}
	}

	pub fn len(&self) -> usize {
		self.connections.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Return the user's connection, opening one (and its receive loop) if none is tracked.
	///
	/// The flag is `true` only for the call that actually opened the connection.
	pub async fn get_or_create(self: &Arc<Self>, user: &UserId) -> Result<(Arc<Connection>, bool), RelayError> {
		// A receive loop marks its connection Closed before evicting it; never hand that out.
		if let Some(conn) = self.current(user).filter(|c| !c.is_closed()) {
			return Ok((conn, false));
		}

		let lock = self.creation_lock(user);
		let guard = lock.lock().await;

		let result = match self.current(user) {
			Some(conn) if !conn.is_closed() => Ok((conn, false)),
			stale => {
				if let Some(stale) = stale {
					self.remove_if_current(user, stale.id());
				}
				self.open(user).await.map(|conn| (conn, true))
			}
		};

		drop(guard);
		self.release_creation_lock(user, &lock);
		result
	}

	async fn open(self: &Arc<Self>, user: &UserId) -> Result<Arc<Connection>, RelayError> {
		let (sink, stream) = match self.transport.open(user).await {
			Ok(halves) => halves,
			Err(e) => {
				metrics::counter!("ikigai_relay_connect_failures_total").increment(1);
				warn!(user = %user, error = %e, "failed to open backend connection");
				return Err(RelayError::transport(user, e));
			}
		};

		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let conn = Arc::new(Connection::new(id, user.clone(), sink));
		self.connections.lock().insert(user.clone(), conn.clone());

		let reader = self.dispatcher.spawn(Arc::downgrade(self), conn.clone(), stream);
		conn.attach_reader(reader.abort_handle());

		metrics::counter!("ikigai_relay_connections_opened_total").increment(1);
		metrics::gauge!("ikigai_relay_connections_active").increment(1.0);
		info!(user = %user, connection_id = id, "backend connection opened");
		Ok(conn)
	}

	fn creation_lock(&self, user: &UserId) -> CreationLock {
		self.creation_locks.lock().entry(user.clone()).or_default().clone()
	}

	// Drop the map entry once nobody else holds or waits on it. Clones are only taken under the
	// map lock, so the count cannot grow behind our back.
	fn release_creation_lock(&self, user: &UserId, lock: &CreationLock) {
		let mut locks = self.creation_locks.lock();
		if Arc::strong_count(lock) == 2 && locks.get(user).is_some_and(|l| Arc::ptr_eq(l, lock)) {
			locks.remove(user);
		}
	}

	/// Forget the user's connection and close it in the background. Safe when nothing is tracked.
	pub fn remove(&self, user: &UserId) -> bool {
		let removed = self.connections.lock().remove(user);
		match removed {
			Some(conn) => {
				self.retire(conn, "removed");
				true
			}
			None => false,
		}
	}

	/// Remove only if `connection_id` is still the tracked connection for `user`.
	pub(crate) fn remove_if_current(&self, user: &UserId, connection_id: u64) -> bool {
		let removed = {
			let mut connections = self.connections.lock();
			match connections.get(user) {
				Some(conn) if conn.id() == connection_id => connections.remove(user),
				_ => None,
			}
		};
		match removed {
			Some(conn) => {
				self.retire(conn, "closed");
				true
			}
			None => false,
		}
	}

	fn retire(&self, conn: Arc<Connection>, reason: &'static str) {
		record_retired(&conn, reason);
		let timeout = self.cfg.close_timeout;
		tokio::spawn(async move { conn.close(timeout).await });
	}

	/// Send `frame` to the user's connection, reconnecting once if it turns out to be closed.
	///
	/// A second closed connection, or any other transport failure, is returned to the caller.
	pub async fn send_with_retry(self: &Arc<Self>, user: &UserId, frame: &str) -> Result<(), RelayError> {
		let mut retries = 0;
		loop {
			let (conn, created) = self.get_or_create(user).await?;
			match conn.send(frame.to_owned()).await {
				Ok(()) => {
					metrics::counter!("ikigai_relay_frames_sent_total").increment(1);
					debug!(user = %user, connection_id = conn.id(), created, "frame sent");
					return Ok(());
				}
				Err(TransportError::Closed) => {
					self.remove_if_current(user, conn.id());
					if retries >= MAX_SEND_RETRIES {
						metrics::counter!("ikigai_relay_send_failures_total").increment(1);
						warn!(user = %user, connection_id = conn.id(), "send failed after reconnect");
						return Err(RelayError::TransportClosed { user: user.clone() });
					}
					retries += 1;
					metrics::counter!("ikigai_relay_send_retries_total").increment(1);
					warn!(user = %user, connection_id = conn.id(), "connection closed during send; reconnecting");
				}
				Err(e) => {
					self.remove_if_current(user, conn.id());
					metrics::counter!("ikigai_relay_send_failures_total").increment(1);
					warn!(user = %user, connection_id = conn.id(), error = %e, "send failed");
					return Err(RelayError::transport(user, e));
				}
			}
		}
	}

	/// Close every tracked connection, each bounded by the close timeout.
	pub async fn close_all(&self) {
		let drained: Vec<Arc<Connection>> = self.connections.lock().drain().map(|(_, c)| c).collect();
		if drained.is_empty() {
			return;
		}
		info!(count = drained.len(), "closing backend connections");
		for conn in &drained {
			record_retired(conn, "shutdown");
			conn.stop_reader();
		}

		let timeout = self.cfg.close_timeout;
		futures::future::join_all(drained.iter().map(|c| c.close(timeout))).await;
	}
}

fn record_retired(conn: &Connection, reason: &'static str) {
	conn.mark_closed();
	metrics::counter!("ikigai_relay_connections_closed_total").increment(1);
	metrics::gauge!("ikigai_relay_connections_active").decrement(1.0);
	info!(user = %conn.user(), connection_id = conn.id(), reason, "backend connection retired");
}
