#![forbid(unsafe_code)]

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::{SinkExt, StreamExt};
use ikigai_domain::{PlatformName, UserId};
use ikigai_util::endpoint::BackendEndpoint;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use super::{FrameSink, FrameStream, Transport};
use crate::config::BackendConfig;
use crate::error::TransportError;

pub type BackendWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens the websocket for a prepared handshake request. Replaceable for tests.
pub type WsConnector = Arc<dyn Fn(Request) -> BoxFuture<'static, anyhow::Result<BackendWs>> + Send + Sync>;

/// Streaming transport: one websocket per user at `{base}/websocket/platform/{platform}/{user}`.
#[derive(Clone)]
pub struct WsTransport {
	endpoint: BackendEndpoint,
	platform: PlatformName,
	auth: Option<(HeaderName, HeaderValue)>,
	connect_timeout: Duration,
	connector: WsConnector,
}

impl std::fmt::Debug for WsTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WsTransport")
			.field("endpoint", &self.endpoint)
			.field("platform", &self.platform)
			.field("auth", &self.auth.as_ref().map(|(name, _)| name))
			.finish_non_exhaustive()
	}
}

impl WsTransport {
	pub fn new(platform: PlatformName, cfg: &BackendConfig) -> anyhow::Result<Self> {
		let endpoint = BackendEndpoint::parse_streaming(&cfg.websocket_url)
			.map_err(anyhow::Error::msg)
			.context("invalid backend websocket url")?;

		let auth = match cfg.auth_header_value() {
			Some(value) => {
				let name = HeaderName::from_bytes(cfg.auth_header.as_bytes()).context("invalid auth header name")?;
				let mut value = HeaderValue::from_str(&value).context("invalid auth header value")?;
				value.set_sensitive(true);
				Some((name, value))
			}
			None => None,
		};

		Ok(Self {
			endpoint,
			platform,
			auth,
			connect_timeout: cfg.connect_timeout,
			connector: default_connector(),
		})
	}

	pub fn with_connector(mut self, connector: WsConnector) -> Self {
		self.connector = connector;
		self
	}

	pub fn user_url(&self, user: &UserId) -> String {
		self.endpoint.user_stream_url(self.platform.as_str(), user.as_str())
	}

	fn request(&self, user: &UserId) -> anyhow::Result<Request> {
		let url = self.user_url(user);
		let mut req = url.as_str().into_client_request().context("build websocket request")?;
		if let Some((name, value)) = &self.auth {
			req.headers_mut().insert(name.clone(), value.clone());
		}
		Ok(req)
	}
}

fn default_connector() -> WsConnector {
	Arc::new(|req: Request| {
		Box::pin(async move {
			let (ws, _resp) = tokio_tungstenite::connect_async(req)
				.await
				.context("connect_async to backend ws")?;
			Ok(ws)
		}) as BoxFuture<'static, anyhow::Result<BackendWs>>
	})
}

#[async_trait]
impl Transport for WsTransport {
	async fn open(&self, user: &UserId) -> Result<(FrameSink, FrameStream), TransportError> {
		let req = self.request(user).map_err(|e| TransportError::other(format!("{e:#}")))?;
		debug!(user = %user, url = %req.uri(), "opening backend websocket");

		let ws = match tokio::time::timeout(self.connect_timeout, (self.connector)(req)).await {
			Ok(Ok(ws)) => ws,
			Ok(Err(e)) => return Err(TransportError::other(format!("{e:#}"))),
			Err(_) => {
				return Err(TransportError::other(format!(
					"connect timed out after {:?}",
					self.connect_timeout
				)));
			}
		};

		let (write, read) = ws.split();

		let sink = write
			.sink_map_err(map_ws_error)
			.with(|frame: String| future::ready(Ok::<_, TransportError>(Message::text(frame))));

		let stream = read.filter_map(|msg| {
			future::ready(match msg {
				Ok(Message::Text(t)) => Some(Ok(t.as_str().to_owned())),
				Ok(Message::Binary(b)) => Some(Ok(String::from_utf8_lossy(&b).into_owned())),
				Ok(Message::Close(frame)) => {
					debug!(?frame, "backend websocket close frame");
					Some(Err(TransportError::Closed))
				}
				// tungstenite answers pings itself.
				Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
				Err(e) => Some(Err(map_ws_error(e))),
			})
		});

		Ok((Box::pin(sink), Box::pin(stream)))
	}
}

fn map_ws_error(e: WsError) -> TransportError {
	match e {
		WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
		WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake | ProtocolError::SendAfterClosing) => {
			TransportError::Closed
		}
		WsError::Io(io)
			if matches!(
				io.kind(),
				ErrorKind::BrokenPipe
					| ErrorKind::ConnectionReset
					| ErrorKind::ConnectionAborted
					| ErrorKind::NotConnected
					| ErrorKind::UnexpectedEof
			) =>
		{
			TransportError::Closed
		}
		other => TransportError::Other(other.to_string()),
	}
}
