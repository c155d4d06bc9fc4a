#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use ikigai_protocol::OutboundEvent;
use ikigai_relay::{DeliveryTracker, RelayError, SecretString, SessionRelay};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::payload::{Receipt, WebhookPayload};
use super::signature::{SIGNATURE_HEADER, verify_signature};

/// Where decoded webhook events go.
#[async_trait]
pub trait EventRelay: Send + Sync + 'static {
	async fn relay(&self, event: &OutboundEvent) -> Result<(), RelayError>;
}

#[async_trait]
impl EventRelay for SessionRelay {
	async fn relay(&self, event: &OutboundEvent) -> Result<(), RelayError> {
		self.handle_event(event).await
	}
}

#[derive(Clone)]
pub struct WebhookState {
	pub path: String,
	pub verify_token: Option<SecretString>,
	pub app_secret: Option<SecretString>,
	pub relay: Arc<dyn EventRelay>,
	pub tracker: Arc<DeliveryTracker>,
}

/// Bind `bind` and serve the webhook in the background. Returns the bound address.
pub async fn spawn_webhook_server(bind: SocketAddr, state: WebhookState) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
	let listener = TcpListener::bind(bind).await?;
	let addr = listener.local_addr()?;
	let handle = tokio::spawn(async move {
		if let Err(err) = run_webhook_server(listener, state).await {
			warn!(error = %err, "whatsapp webhook server stopped");
		}
	});
	Ok((addr, handle))
}

async fn run_webhook_server(listener: TcpListener, state: WebhookState) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_webhook(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "whatsapp webhook connection error");
			}
		});
	}
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body.into()));
	*resp.status_mut() = status;
	resp
}

async fn handle_webhook(req: Request<Incoming>, state: WebhookState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let (parts, body) = req.into_parts();

	if parts.uri.path() != state.path {
		return Ok(respond(StatusCode::NOT_FOUND, Bytes::new()));
	}

	match parts.method {
		Method::GET => Ok(verify_subscription(parts.uri.query().unwrap_or(""), &state)),
		Method::POST => {
			metrics::counter!("ikigai_whatsapp_webhook_requests_total").increment(1);
			let body_bytes = match body.collect().await {
				Ok(collected) => collected.to_bytes(),
				Err(err) => {
					warn!(error = %err, "whatsapp webhook body read failed");
					return Ok(respond(StatusCode::BAD_REQUEST, Bytes::new()));
				}
			};
			let signature = parts.headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
			Ok(handle_callback(&state, signature, &body_bytes).await)
		}
		_ => Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new())),
	}
}

fn query_param(query: &str, name: &str) -> Option<String> {
	url::form_urlencoded::parse(query.as_bytes())
		.find(|(key, _)| key == name)
		.map(|(_, value)| value.into_owned())
}

/// Subscription handshake: echo `hub.challenge` when the verify token matches.
fn verify_subscription(query: &str, state: &WebhookState) -> Response<Full<Bytes>> {
	let Some(expected) = state.verify_token.as_ref().filter(|t| !t.is_empty()) else {
		warn!("whatsapp webhook verification requested but no verify token is configured");
		return respond(StatusCode::FORBIDDEN, Bytes::new());
	};

	let mode = query_param(query, "hub.mode");
	let token = query_param(query, "hub.verify_token");
	let challenge = query_param(query, "hub.challenge");

	match (mode.as_deref(), token, challenge) {
		(Some("subscribe"), Some(token), Some(challenge)) if token == expected.expose() => {
			info!("whatsapp webhook subscription verified");
			respond(StatusCode::OK, challenge)
		}
		_ => {
			metrics::counter!("ikigai_whatsapp_webhook_verify_failures_total").increment(1);
			respond(StatusCode::FORBIDDEN, Bytes::new())
		}
	}
}

async fn handle_callback(state: &WebhookState, signature: Option<&str>, body: &[u8]) -> Response<Full<Bytes>> {
	if let Some(secret) = state.app_secret.as_ref().filter(|s| !s.is_empty()) {
		let valid = signature.is_some_and(|sig| verify_signature(secret.expose().as_bytes(), body, sig));
		if !valid {
			metrics::counter!("ikigai_whatsapp_webhook_signature_invalid_total").increment(1);
			return respond(StatusCode::UNAUTHORIZED, Bytes::new());
		}
	}

	let payload = match WebhookPayload::parse(body) {
		Ok(p) => p,
		Err(err) => {
			warn!(error = %err, "whatsapp webhook payload parse failed");
			metrics::counter!("ikigai_whatsapp_webhook_parse_errors_total").increment(1);
			return respond(StatusCode::BAD_REQUEST, Bytes::new());
		}
	};
	let update = payload.into_update();

	for receipt in update.receipts {
		match receipt {
			Receipt::Delivered(id) => {
				let woke = state.tracker.confirm(&id);
				debug!(message_id = %id, woke, "delivery receipt");
			}
			Receipt::Failed(id, reason) => {
				let woke = state.tracker.fail(&id, reason.clone());
				warn!(message_id = %id, reason = %reason, woke, "whatsapp reported delivery failure");
			}
		}
	}

	let mut failed = 0usize;
	for event in &update.events {
		if let Err(err) = state.relay.relay(event).await {
			failed += 1;
			metrics::counter!("ikigai_whatsapp_webhook_relay_errors_total").increment(1);
			warn!(user = %event.user_id(), action = event.action(), error = %err, "failed to relay webhook event");
		}
	}

	if failed > 0 {
		return respond(StatusCode::BAD_GATEWAY, Bytes::new());
	}
	respond(StatusCode::OK, Bytes::new())
}
