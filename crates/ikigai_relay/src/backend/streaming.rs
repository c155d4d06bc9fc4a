#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use ikigai_protocol::{Instruction, OutboundEvent};

use super::Backend;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;

/// Sends events over the user's persistent connection; replies come back through its receive loop.
#[derive(Debug, Clone)]
pub struct StreamingBackend {
	registry: Arc<ConnectionRegistry>,
}

impl StreamingBackend {
	pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
		Self { registry }
	}

	pub fn registry(&self) -> &Arc<ConnectionRegistry> {
		&self.registry
	}
}

#[async_trait]
impl Backend for StreamingBackend {
	async fn post_event(&self, event: &OutboundEvent) -> Result<Vec<Instruction>, RelayError> {
		let frame = event.to_frame()?;
		self.registry.send_with_retry(event.user_id(), &frame).await?;
		Ok(Vec::new())
	}
}
