#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use ikigai_relay::SecretString;

pub const DEFAULT_API_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v21.0";
pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook";
pub const DEFAULT_BUTTON_BODY: &str = "Choose an option:";

#[derive(Clone)]
pub struct WhatsAppConfig {
	pub api_base_url: String,
	pub api_version: String,
	pub phone_number_id: String,
	pub access_token: SecretString,
	/// Enables `X-Hub-Signature-256` verification on the webhook.
	pub app_secret: Option<SecretString>,
	pub verify_token: Option<SecretString>,
	/// Base for relative media paths in image/sticker instructions.
	pub media_base_url: Option<String>,
	/// Body used for an image-with-buttons message that has no caption.
	pub button_body: String,
	pub request_timeout: Duration,
	pub verify_tls: bool,
	pub webhook_bind: Option<SocketAddr>,
	pub webhook_path: String,
}

impl std::fmt::Debug for WhatsAppConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WhatsAppConfig")
			.field("api_base_url", &self.api_base_url)
			.field("api_version", &self.api_version)
			.field("phone_number_id", &self.phone_number_id)
			.field("app_secret", &self.app_secret.is_some())
			.field("verify_token", &self.verify_token.is_some())
			.field("media_base_url", &self.media_base_url)
			.field("webhook_bind", &self.webhook_bind)
			.field("webhook_path", &self.webhook_path)
			.finish_non_exhaustive()
	}
}

impl WhatsAppConfig {
	pub fn new(phone_number_id: impl Into<String>, access_token: SecretString) -> Self {
		Self {
			api_base_url: DEFAULT_API_BASE_URL.to_string(),
			api_version: DEFAULT_API_VERSION.to_string(),
			phone_number_id: phone_number_id.into(),
			access_token,
			app_secret: None,
			verify_token: None,
			media_base_url: None,
			button_body: DEFAULT_BUTTON_BODY.to_string(),
			request_timeout: Duration::from_secs(60),
			verify_tls: true,
			webhook_bind: None,
			webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
		}
	}

	/// `{api_base_url}/{api_version}/{phone_number_id}/messages`
	pub fn messages_url(&self) -> String {
		format!(
			"{}/{}/{}/messages",
			self.api_base_url.trim_end_matches('/'),
			self.api_version.trim_matches('/'),
			self.phone_number_id.trim()
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn messages_url_joins_parts() {
		let mut cfg = WhatsAppConfig::new(" 1234567890 ", SecretString::new("t"));
		assert_eq!(cfg.messages_url(), "https://graph.facebook.com/v21.0/1234567890/messages");

		cfg.api_base_url = "http://127.0.0.1:9000/".to_string();
		assert_eq!(cfg.messages_url(), "http://127.0.0.1:9000/v21.0/1234567890/messages");
	}

	#[test]
	fn debug_hides_secrets() {
		let mut cfg = WhatsAppConfig::new("1", SecretString::new("EAAG-access"));
		cfg.app_secret = Some(SecretString::new("app-secret-value"));
		let out = format!("{cfg:?}");
		assert!(!out.contains("EAAG-access"));
		assert!(!out.contains("app-secret-value"));
	}
}
