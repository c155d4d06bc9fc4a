#![forbid(unsafe_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use ikigai_domain::PlatformName;
use ikigai_relay::{BackendConfig, BackendMode, RelayConfig, SecretString};
use ikigai_whatsapp::WhatsAppConfig;
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.ikigai/relay.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".ikigai").join("relay.toml"))
}

/// Load the bot config from TOML and `IKIGAI_*` env overrides.
pub fn load_bot_config_from_path(path: &Path) -> anyhow::Result<BotConfig> {
	load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<BotConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = BotConfig::from_file(file_cfg)?;
	apply_env_overrides(&mut cfg, env)?;

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct BotConfig {
	pub backend: BackendSettings,
	pub relay: RelaySettings,
	pub whatsapp: WhatsAppSettings,
	pub server: ServerSettings,
}

/// Backend connection settings. `None` keeps the relay default.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
	pub mode: BackendMode,
	pub websocket_url: Option<String>,
	pub api_url: Option<String>,
	pub platform_name: Option<PlatformName>,
	pub auth_token: Option<SecretString>,
	/// Header carrying the token; `Authorization` gets a `Bearer` scheme.
	pub auth_header: Option<String>,
	pub connect_timeout: Option<Duration>,
	pub request_timeout: Option<Duration>,
	pub close_timeout: Option<Duration>,
	pub verify_tls: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RelaySettings {
	pub ack_timeout: Option<Duration>,
	pub placeholder_content: Option<String>,
	pub sticker_extension: Option<String>,
	pub queue_warn_depth: Option<usize>,
	pub max_frame_size: Option<usize>,
	pub shutdown_grace: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct WhatsAppSettings {
	pub api_base_url: Option<String>,
	pub api_version: Option<String>,
	pub phone_number_id: Option<String>,
	pub access_token: Option<SecretString>,
	pub app_secret: Option<SecretString>,
	pub verify_token: Option<SecretString>,
	pub media_base_url: Option<String>,
	pub button_body: Option<String>,
	pub request_timeout: Option<Duration>,
	pub webhook_bind: Option<String>,
	pub webhook_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	backend: FileBackendSettings,

	#[serde(default)]
	relay: FileRelaySettings,

	#[serde(default)]
	whatsapp: FileWhatsAppSettings,

	#[serde(default)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileBackendSettings {
	mode: Option<String>,
	websocket_url: Option<String>,
	api_url: Option<String>,
	platform_name: Option<String>,
	auth_token: Option<String>,
	auth_header: Option<String>,
	connect_timeout_secs: Option<u64>,
	request_timeout_secs: Option<u64>,
	close_timeout_secs: Option<u64>,
	verify_tls: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRelaySettings {
	ack_timeout_ms: Option<u64>,
	placeholder_content: Option<String>,
	sticker_extension: Option<String>,
	queue_warn_depth: Option<usize>,
	max_frame_size: Option<usize>,
	shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileWhatsAppSettings {
	api_base_url: Option<String>,
	api_version: Option<String>,
	phone_number_id: Option<String>,
	access_token: Option<String>,
	app_secret: Option<String>,
	verify_token: Option<String>,
	media_base_url: Option<String>,
	button_body: Option<String>,
	request_timeout_secs: Option<u64>,
	webhook_bind: Option<String>,
	webhook_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn secret(v: Option<String>) -> Option<SecretString> {
	non_blank(v).map(SecretString::new)
}

impl BotConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let mode = match non_blank(file.backend.mode) {
			Some(mode) => mode.parse::<BackendMode>().map_err(|e| anyhow!(e)).context("backend.mode")?,
			None => BackendMode::default(),
		};
		let platform_name = non_blank(file.backend.platform_name)
			.map(PlatformName::new)
			.transpose()
			.context("backend.platform_name")?;

		let backend = BackendSettings {
			mode,
			websocket_url: non_blank(file.backend.websocket_url),
			api_url: non_blank(file.backend.api_url),
			platform_name,
			auth_token: secret(file.backend.auth_token),
			auth_header: non_blank(file.backend.auth_header),
			connect_timeout: file.backend.connect_timeout_secs.map(Duration::from_secs),
			request_timeout: file.backend.request_timeout_secs.map(Duration::from_secs),
			close_timeout: file.backend.close_timeout_secs.map(Duration::from_secs),
			verify_tls: file.backend.verify_tls.unwrap_or(true),
		};

		let relay = RelaySettings {
			ack_timeout: file.relay.ack_timeout_ms.map(Duration::from_millis),
			placeholder_content: non_blank(file.relay.placeholder_content),
			sticker_extension: non_blank(file.relay.sticker_extension)
				.map(|ext| ext.trim_start_matches('.').to_string()),
			queue_warn_depth: file.relay.queue_warn_depth.filter(|v| *v > 0),
			max_frame_size: file.relay.max_frame_size.filter(|v| *v > 0),
			shutdown_grace: file.relay.shutdown_grace_ms.map(Duration::from_millis),
		};

		let whatsapp = WhatsAppSettings {
			api_base_url: non_blank(file.whatsapp.api_base_url),
			api_version: non_blank(file.whatsapp.api_version),
			phone_number_id: non_blank(file.whatsapp.phone_number_id),
			access_token: secret(file.whatsapp.access_token),
			app_secret: secret(file.whatsapp.app_secret),
			verify_token: secret(file.whatsapp.verify_token),
			media_base_url: non_blank(file.whatsapp.media_base_url),
			button_body: non_blank(file.whatsapp.button_body),
			request_timeout: file.whatsapp.request_timeout_secs.map(Duration::from_secs),
			webhook_bind: non_blank(file.whatsapp.webhook_bind),
			webhook_path: non_blank(file.whatsapp.webhook_path),
		};

		Ok(Self {
			backend,
			relay,
			whatsapp,
			server: ServerSettings {
				metrics_bind: non_blank(file.server.metrics_bind),
				health_bind: non_blank(file.server.health_bind),
			},
		})
	}

	/// Relay core config: relay defaults with every configured value layered on top.
	pub fn relay_config(&self) -> RelayConfig {
		let defaults = RelayConfig::default();
		let backend_defaults = BackendConfig::default();
		let b = &self.backend;
		let r = &self.relay;

		RelayConfig {
			platform: b.platform_name.clone().unwrap_or(defaults.platform),
			backend: BackendConfig {
				mode: b.mode,
				websocket_url: b.websocket_url.clone().unwrap_or(backend_defaults.websocket_url),
				api_url: b.api_url.clone().unwrap_or(backend_defaults.api_url),
				auth_token: b.auth_token.clone(),
				auth_header: b.auth_header.clone().unwrap_or(backend_defaults.auth_header),
				connect_timeout: b.connect_timeout.unwrap_or(backend_defaults.connect_timeout),
				request_timeout: b.request_timeout.unwrap_or(backend_defaults.request_timeout),
				close_timeout: b.close_timeout.unwrap_or(backend_defaults.close_timeout),
				verify_tls: b.verify_tls,
			},
			ack_timeout: r.ack_timeout.unwrap_or(defaults.ack_timeout),
			placeholder_content: r.placeholder_content.clone().unwrap_or(defaults.placeholder_content),
			sticker_extension: r.sticker_extension.clone().unwrap_or(defaults.sticker_extension),
			queue_warn_depth: r.queue_warn_depth.unwrap_or(defaults.queue_warn_depth),
			max_frame_size: r.max_frame_size.unwrap_or(defaults.max_frame_size),
			shutdown_grace: r.shutdown_grace.unwrap_or(defaults.shutdown_grace),
		}
	}

	/// WhatsApp adapter config. Fails when the Cloud API credentials are missing.
	pub fn whatsapp_config(&self) -> anyhow::Result<WhatsAppConfig> {
		let w = &self.whatsapp;
		let phone_number_id = w
			.phone_number_id
			.clone()
			.ok_or_else(|| anyhow!("whatsapp.phone_number_id is required"))?;
		let access_token = w
			.access_token
			.clone()
			.ok_or_else(|| anyhow!("whatsapp.access_token is required"))?;

		let mut cfg = WhatsAppConfig::new(phone_number_id, access_token);
		if let Some(v) = &w.api_base_url {
			cfg.api_base_url = v.clone();
		}
		if let Some(v) = &w.api_version {
			cfg.api_version = v.clone();
		}
		if let Some(v) = &w.button_body {
			cfg.button_body = v.clone();
		}
		if let Some(v) = w.request_timeout {
			cfg.request_timeout = v;
		}
		if let Some(v) = &w.webhook_path {
			cfg.webhook_path = if v.starts_with('/') { v.clone() } else { format!("/{v}") };
		}
		if let Some(bind) = &w.webhook_bind {
			let addr = bind
				.parse::<SocketAddr>()
				.with_context(|| format!("whatsapp.webhook_bind `{bind}` (expected host:port)"))?;
			cfg.webhook_bind = Some(addr);
		}
		cfg.app_secret = w.app_secret.clone();
		cfg.verify_token = w.verify_token.clone();
		cfg.media_base_url = w.media_base_url.clone();
		cfg.verify_tls = self.backend.verify_tls;

		if cfg.app_secret.is_none() {
			warn!("whatsapp config: no app_secret; webhook signatures will not be verified");
		}
		Ok(cfg)
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut BotConfig, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
	let var = |key: &str| non_blank(env(key));

	if let Some(v) = var("IKIGAI_BACKEND_MODE") {
		cfg.backend.mode = v.parse::<BackendMode>().map_err(|e| anyhow!(e)).context("IKIGAI_BACKEND_MODE")?;
		info!(mode = %cfg.backend.mode, "backend config: mode overridden by env");
	}

	if let Some(v) = var("IKIGAI_BACKEND_WEBSOCKET_URL") {
		cfg.backend.websocket_url = Some(v);
		info!("backend config: websocket_url overridden by env");
	}

	if let Some(v) = var("IKIGAI_BACKEND_API_URL") {
		cfg.backend.api_url = Some(v);
		info!("backend config: api_url overridden by env");
	}

	if let Some(v) = var("IKIGAI_PLATFORM_NAME") {
		cfg.backend.platform_name = Some(PlatformName::new(v).context("IKIGAI_PLATFORM_NAME")?);
		info!("backend config: platform_name overridden by env");
	}

	if let Some(v) = var("IKIGAI_BACKEND_AUTH_TOKEN") {
		cfg.backend.auth_token = Some(SecretString::new(v));
		info!("backend auth: auth_token overridden by env");
	}

	if let Some(v) = var("IKIGAI_BACKEND_AUTH_HEADER") {
		cfg.backend.auth_header = Some(v);
		info!("backend auth: auth_header overridden by env");
	}

	if let Some(v) = var("IKIGAI_BACKEND_VERIFY_TLS")
		&& let Some(verify) = parse_env_bool(&v)
	{
		cfg.backend.verify_tls = verify;
		info!(verify_tls = verify, "backend config: verify_tls overridden by env");
	}

	if let Some(v) = var("IKIGAI_ACK_TIMEOUT_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.relay.ack_timeout = Some(Duration::from_millis(ms));
		info!(ms, "relay config: ack_timeout overridden by env");
	}

	if let Some(v) = var("IKIGAI_WHATSAPP_PHONE_NUMBER_ID") {
		cfg.whatsapp.phone_number_id = Some(v);
		info!("whatsapp config: phone_number_id overridden by env");
	}

	if let Some(v) = var("IKIGAI_WHATSAPP_ACCESS_TOKEN") {
		cfg.whatsapp.access_token = Some(SecretString::new(v));
		info!("whatsapp config: access_token overridden by env");
	}

	if let Some(v) = var("IKIGAI_WHATSAPP_APP_SECRET") {
		cfg.whatsapp.app_secret = Some(SecretString::new(v));
		info!("whatsapp config: app_secret overridden by env");
	}

	if let Some(v) = var("IKIGAI_WHATSAPP_VERIFY_TOKEN") {
		cfg.whatsapp.verify_token = Some(SecretString::new(v));
		info!("whatsapp config: verify_token overridden by env");
	}

	if let Some(v) = var("IKIGAI_WHATSAPP_MEDIA_BASE_URL") {
		cfg.whatsapp.media_base_url = Some(v);
		info!("whatsapp config: media_base_url overridden by env");
	}

	if let Some(v) = var("IKIGAI_WHATSAPP_WEBHOOK_BIND") {
		cfg.whatsapp.webhook_bind = Some(v);
		info!("whatsapp config: webhook_bind overridden by env");
	}

	if let Some(v) = var("IKIGAI_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = var("IKIGAI_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if cfg.backend.auth_token.is_none() {
		warn!("backend auth: no auth_token configured; backend requests are unauthenticated");
	}

	Ok(())
}
