#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use ikigai_domain::UserId;
use ikigai_protocol::OutboundEvent;
use tracing::{debug, info};

use crate::backend::{Backend, BackendMode, HttpBackend, StreamingBackend};
use crate::channel::Channel;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::executor::{ActionExecutor, ExecutorConfig};
use crate::queue::{InstructionQueues, QueueConfig};
use crate::registry::{ConnectionRegistry, RegistryConfig};
use crate::transport::{Transport, WsTransport};

/// Top-level relay: outbound events go to the backend, replies are queued per user and applied
/// to the channel in order.
pub struct SessionRelay {
	backend: Arc<dyn Backend>,
	queues: InstructionQueues,
	registry: Option<Arc<ConnectionRegistry>>,
	shutdown_grace: Duration,
}

impl std::fmt::Debug for SessionRelay {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionRelay")
			.field("queues", &self.queues)
			.field("registry", &self.registry)
			.finish_non_exhaustive()
	}
}

impl SessionRelay {
	/// Build the relay for the configured backend mode.
	pub fn new(cfg: &RelayConfig, channel: Arc<dyn Channel>) -> anyhow::Result<Self> {
		match cfg.backend.mode {
			BackendMode::Streaming => {
				let transport = WsTransport::new(cfg.platform.clone(), &cfg.backend)?;
				Ok(Self::with_transport(cfg, channel, Arc::new(transport)))
			}
			BackendMode::Http => {
				let backend = HttpBackend::new(cfg.platform.clone(), &cfg.backend)?;
				Ok(Self::with_backend(cfg, channel, Arc::new(backend)))
			}
		}
	}

	/// Streaming relay over a caller-supplied transport.
	pub fn with_transport(cfg: &RelayConfig, channel: Arc<dyn Channel>, transport: Arc<dyn Transport>) -> Self {
		let queues = build_queues(cfg, channel);
		let registry = ConnectionRegistry::new(
			transport,
			Arc::new(queues.clone()),
			RegistryConfig {
				close_timeout: cfg.backend.close_timeout,
				max_frame_size: cfg.max_frame_size,
			},
		);
		Self {
			backend: Arc::new(StreamingBackend::new(registry.clone())),
			queues,
			registry: Some(registry),
			shutdown_grace: cfg.shutdown_grace,
		}
	}

	/// Relay over a caller-supplied backend; no persistent connections are kept.
	pub fn with_backend(cfg: &RelayConfig, channel: Arc<dyn Channel>, backend: Arc<dyn Backend>) -> Self {
		Self {
			backend,
			queues: build_queues(cfg, channel),
			registry: None,
			shutdown_grace: cfg.shutdown_grace,
		}
	}

	/// Serialize `event`, deliver it to the backend and queue any direct replies.
	pub async fn handle_event(&self, event: &OutboundEvent) -> Result<(), RelayError> {
		let user = event.user_id();
		debug!(user = %user, action = event.action(), "relaying event");
		metrics::counter!("ikigai_relay_events_total", "action" => event.action()).increment(1);

		let replies = self.backend.post_event(event).await?;
		for instruction in replies {
			self.queues.add_response_to_queue(user, instruction);
		}
		Ok(())
	}

	/// Open the user's connection ahead of the first event so backend-initiated instructions can
	/// arrive. No-op for request/response backends.
	pub async fn listen(&self, user: &UserId) -> Result<bool, RelayError> {
		match &self.registry {
			Some(registry) => registry.get_or_create(user).await.map(|(_, created)| created),
			None => Ok(false),
		}
	}

	pub fn queues(&self) -> &InstructionQueues {
		&self.queues
	}

	pub fn registry(&self) -> Option<&Arc<ConnectionRegistry>> {
		self.registry.as_ref()
	}

	/// Close connections so nothing new arrives, then drain workers within the configured grace.
	pub async fn shutdown(&self) {
		info!("session relay shutting down");
		if let Some(registry) = &self.registry {
			registry.close_all().await;
		}
		self.queues.shutdown(self.shutdown_grace).await;
	}
}

fn build_queues(cfg: &RelayConfig, channel: Arc<dyn Channel>) -> InstructionQueues {
	let executor = ActionExecutor::new(
		channel,
		ExecutorConfig {
			ack_timeout: cfg.ack_timeout,
			placeholder_content: cfg.placeholder_content.clone(),
			sticker_extension: cfg.sticker_extension.clone(),
		},
	);
	InstructionQueues::new(
		Arc::new(executor),
		QueueConfig {
			warn_depth: cfg.queue_warn_depth,
		},
	)
}
