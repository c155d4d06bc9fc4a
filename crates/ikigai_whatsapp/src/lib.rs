#![forbid(unsafe_code)]

//! WhatsApp Cloud API adapter: the [`ikigai_relay::Channel`] implementation and the webhook
//! that feeds user events and delivery receipts into the relay.

pub mod channel;
pub mod client;
pub mod config;
pub mod message;
pub mod webhook;

pub use channel::WhatsAppChannel;
pub use client::{SentMessage, WhatsAppClient};
pub use config::WhatsAppConfig;
pub use message::{OutgoingMessage, callback_id, parse_callback_id};
pub use webhook::{EventRelay, WebhookState, spawn_webhook_server};
