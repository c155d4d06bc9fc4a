#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

const STARTING: u8 = 0;
const READY: u8 = 1;
const DRAINING: u8 = 2;

/// Liveness is unconditional; readiness flips on once the relay and webhook are up and off
/// again when shutdown starts.
#[derive(Clone, Default)]
pub struct HealthState {
	phase: Arc<AtomicU8>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mark_ready(&self) {
		self.phase.store(READY, Ordering::Relaxed);
	}

	pub fn mark_draining(&self) {
		self.phase.store(DRAINING, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.phase.load(Ordering::Relaxed) == READY
	}

	fn readiness_body(&self) -> &'static [u8] {
		match self.phase.load(Ordering::Relaxed) {
			STARTING => b"not-ready",
			READY => b"ready",
			_ => b"draining",
		}
	}
}

/// Bind and serve in the background. Returns the bound address.
pub async fn spawn_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<SocketAddr> {
	let listener = TcpListener::bind(bind).await?;
	let addr = listener.local_addr()?;
	tokio::spawn(async move {
		if let Err(err) = run_health_server(listener, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
	Ok(addr)
}

async fn run_health_server(listener: TcpListener, state: HealthState) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn respond(status: StatusCode, body: &'static [u8]) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(Bytes::from_static(body)));
	*resp.status_mut() = status;
	resp
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, b""));
	}

	let resp = match req.uri().path() {
		"/healthz" => respond(StatusCode::OK, b"ok"),
		"/readyz" if state.is_ready() => respond(StatusCode::OK, state.readiness_body()),
		"/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, state.readiness_body()),
		_ => respond(StatusCode::NOT_FOUND, b""),
	};
	Ok(resp)
}
