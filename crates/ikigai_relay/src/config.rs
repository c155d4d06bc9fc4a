#![forbid(unsafe_code)]

use std::time::Duration;

use ikigai_domain::PlatformName;
use ikigai_protocol::DEFAULT_MAX_FRAME_SIZE;

use crate::SecretString;
use crate::backend::BackendMode;

pub const DEFAULT_WEBSOCKET_URL: &str = "ws://electro:8000";
pub const DEFAULT_API_URL: &str = "http://electro:8000";
pub const DEFAULT_AUTH_HEADER: &str = "Authorization";
pub const DEFAULT_PLACEHOLDER_CONTENT: &str = "More options:";
pub const DEFAULT_STICKER_EXTENSION: &str = "webp";

/// How the relay reaches the backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
	pub mode: BackendMode,
	/// Base for per-user streaming connections (`ws://` or `wss://`).
	pub websocket_url: String,
	/// Base for request/response mode (`http://` or `https://`).
	pub api_url: String,
	pub auth_token: Option<SecretString>,
	pub auth_header: String,
	pub connect_timeout: Duration,
	pub request_timeout: Duration,
	pub close_timeout: Duration,
	pub verify_tls: bool,
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			mode: BackendMode::Streaming,
			websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
			api_url: DEFAULT_API_URL.to_string(),
			auth_token: None,
			auth_header: DEFAULT_AUTH_HEADER.to_string(),
			connect_timeout: Duration::from_secs(10),
			request_timeout: Duration::from_secs(60),
			close_timeout: Duration::from_secs(10),
			verify_tls: true,
		}
	}
}

impl BackendConfig {
	/// Value for the auth header, if a token is configured.
	///
	/// The standard `Authorization` header gets a `Bearer` scheme; custom headers carry the raw token.
	pub fn auth_header_value(&self) -> Option<String> {
		let token = self.auth_token.as_ref().filter(|t| !t.is_empty())?;
		if self.auth_header.eq_ignore_ascii_case(DEFAULT_AUTH_HEADER) {
			Some(format!("Bearer {}", token.expose()))
		} else {
			Some(token.expose().to_string())
		}
	}
}

/// Everything the relay core needs. Built by the caller; the core never reads env or files.
#[derive(Debug, Clone)]
pub struct RelayConfig {
	pub platform: PlatformName,
	pub backend: BackendConfig,
	pub ack_timeout: Duration,
	pub placeholder_content: String,
	pub sticker_extension: String,
	pub queue_warn_depth: usize,
	pub max_frame_size: usize,
	pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			platform: PlatformName::default(),
			backend: BackendConfig::default(),
			ack_timeout: Duration::from_secs(10),
			placeholder_content: DEFAULT_PLACEHOLDER_CONTENT.to_string(),
			sticker_extension: DEFAULT_STICKER_EXTENSION.to_string(),
			queue_warn_depth: 256,
			max_frame_size: DEFAULT_MAX_FRAME_SIZE,
			shutdown_grace: Duration::from_secs(5),
		}
	}
}
