#![forbid(unsafe_code)]

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use ikigai_relay::{DeliveryTracker, SessionRelay};
use ikigai_whatsapp::{WebhookState, WhatsAppChannel, spawn_webhook_server};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::health::{HealthState, spawn_health_server};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: ikigai_bot [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.ikigai/relay.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ikigai_bot=debug,ikigai_relay=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("ikigai_bot");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let bot_cfg = crate::config::load_bot_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded bot config (toml + env overrides)");

	init_metrics(bot_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = bot_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => match spawn_health_server(addr, health_state.clone()).await {
				Ok(bound) => info!(addr = %bound, "health server listening"),
				Err(e) => warn!(error = %e, %addr, "failed to start health server"),
			},
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let relay_cfg = bot_cfg.relay_config();
	let whatsapp_cfg = bot_cfg.whatsapp_config()?;

	let tracker = Arc::new(DeliveryTracker::default());
	let channel = WhatsAppChannel::new(&whatsapp_cfg, tracker.clone())?;
	let relay = Arc::new(SessionRelay::new(&relay_cfg, Arc::new(channel))?);
	info!(
		platform = %relay_cfg.platform,
		mode = %relay_cfg.backend.mode,
		phone_number_id = %whatsapp_cfg.phone_number_id,
		"session relay ready"
	);

	let webhook = match whatsapp_cfg.webhook_bind {
		Some(bind) => {
			let state = WebhookState {
				path: whatsapp_cfg.webhook_path.clone(),
				verify_token: whatsapp_cfg.verify_token.clone(),
				app_secret: whatsapp_cfg.app_secret.clone(),
				relay: relay.clone(),
				tracker,
			};
			let (addr, handle) = spawn_webhook_server(bind, state).await?;
			info!(%addr, path = %whatsapp_cfg.webhook_path, "whatsapp webhook listening");
			Some(handle)
		}
		None => {
			warn!("whatsapp.webhook_bind not set; no inbound events or delivery receipts will arrive");
			None
		}
	};

	health_state.mark_ready();

	tokio::signal::ctrl_c().await?;
	info!("shutdown requested");
	health_state.mark_draining();

	if let Some(handle) = webhook {
		handle.abort();
	}
	relay.shutdown().await;
	info!("ikigai_bot stopped");

	Ok(())
}
