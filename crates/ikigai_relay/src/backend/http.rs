#![forbid(unsafe_code)]

use anyhow::Context;
use async_trait::async_trait;
use ikigai_domain::PlatformName;
use ikigai_protocol::{Instruction, OutboundEvent, serialize_event};
use ikigai_util::endpoint::BackendEndpoint;
use tracing::{debug, warn};

use super::Backend;
use crate::SecretString;
use crate::config::BackendConfig;
use crate::error::RelayError;

/// Request/response backend: `POST {api_url}/platform/{platform}/{action}` per event.
#[derive(Debug, Clone)]
pub struct HttpBackend {
	endpoint: BackendEndpoint,
	platform: PlatformName,
	auth_header: String,
	auth_value: Option<SecretString>,
	client: reqwest::Client,
}

impl HttpBackend {
	pub fn new(platform: PlatformName, cfg: &BackendConfig) -> anyhow::Result<Self> {
		let endpoint = BackendEndpoint::parse_http(&cfg.api_url)
			.map_err(anyhow::Error::msg)
			.context("invalid backend api url")?;

		let client = reqwest::Client::builder()
			.timeout(cfg.request_timeout)
			.connect_timeout(cfg.connect_timeout)
			.danger_accept_invalid_certs(!cfg.verify_tls)
			.build()
			.context("build backend http client")?;

		Ok(Self {
			endpoint,
			platform,
			auth_header: cfg.auth_header.clone(),
			auth_value: cfg.auth_header_value().map(SecretString::new),
			client,
		})
	}

	pub fn event_url(&self, event: &OutboundEvent) -> String {
		self.endpoint.event_url(self.platform.as_str(), event.action())
	}
}

#[async_trait]
impl Backend for HttpBackend {
	async fn post_event(&self, event: &OutboundEvent) -> Result<Vec<Instruction>, RelayError> {
		let user = event.user_id();
		let transport_err = |detail: String| RelayError::TransportError {
			user: user.clone(),
			detail,
		};

		let mut req = self.client.post(self.event_url(event)).json(&serialize_event(event));
		if let Some(value) = &self.auth_value {
			req = req.header(self.auth_header.as_str(), value.expose());
		}

		let resp = req.send().await.map_err(|e| transport_err(format!("backend request: {e}")))?;
		let status = resp.status();
		let body = resp
			.text()
			.await
			.map_err(|e| transport_err(format!("backend response body: {e}")))?;

		if !status.is_success() {
			metrics::counter!("ikigai_relay_backend_http_errors_total").increment(1);
			let snippet: String = body.chars().take(256).collect();
			return Err(transport_err(format!("backend returned {status}: {snippet}")));
		}

		let mut instructions = Vec::new();
		for (idx, item) in Instruction::decode_list(&body)?.into_iter().enumerate() {
			match item {
				Ok(instruction) => instructions.push(instruction),
				Err(e) => {
					metrics::counter!("ikigai_relay_frames_dropped_total").increment(1);
					warn!(user = %user, index = idx, error = %e, "dropping undecodable reply instruction");
				}
			}
		}

		debug!(user = %user, action = event.action(), replies = instructions.len(), "backend replied");
		Ok(instructions)
	}
}
