#![forbid(unsafe_code)]

use std::sync::{Arc, Weak};

use futures::StreamExt;
use ikigai_protocol::Instruction;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::queue::InstructionSink;
use crate::registry::ConnectionRegistry;
use crate::transport::{Connection, FrameStream};

/// Receive loop for one backend connection.
///
/// Frames are decoded into instructions and handed to the user's queue. Undecodable frames are
/// dropped. When the stream ends the connection is removed from the registry; the user's queue
/// and worker are left alone.
#[derive(Clone)]
pub struct InboundDispatcher {
	sink: Arc<dyn InstructionSink>,
	max_frame_size: usize,
}

impl InboundDispatcher {
	pub fn new(sink: Arc<dyn InstructionSink>, max_frame_size: usize) -> Self {
		Self { sink, max_frame_size }
	}

	pub(crate) fn spawn(
		&self,
		registry: Weak<ConnectionRegistry>,
		conn: Arc<Connection>,
		stream: FrameStream,
	) -> JoinHandle<()> {
		let this = self.clone();
		tokio::spawn(async move { this.run(registry, conn, stream).await })
	}

	pub(crate) async fn run(&self, registry: Weak<ConnectionRegistry>, conn: Arc<Connection>, mut stream: FrameStream) {
		let user = conn.user().clone();
		let connection_id = conn.id();

		loop {
			match stream.next().await {
				Some(Ok(frame)) => match Instruction::decode_with_limit(&frame, self.max_frame_size) {
					Ok(instruction) => {
						metrics::counter!("ikigai_relay_frames_received_total").increment(1);
						debug!(user = %user, action = instruction.tag(), "instruction received");
						self.sink.add_response_to_queue(&user, instruction);
					}
					Err(e) => {
						metrics::counter!("ikigai_relay_frames_dropped_total").increment(1);
						warn!(user = %user, connection_id, error = %e, "dropping undecodable frame");
					}
				},
				Some(Err(TransportError::Closed)) | None => {
					info!(user = %user, connection_id, "backend connection closed by peer");
					break;
				}
				Some(Err(e)) => {
					warn!(user = %user, connection_id, error = %e, "backend connection read error");
					break;
				}
			}
		}

		conn.mark_closed();
		if let Some(registry) = registry.upgrade() {
			registry.remove_if_current(&user, connection_id);
		}
	}
}
