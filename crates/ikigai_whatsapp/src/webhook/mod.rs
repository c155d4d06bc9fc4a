#![forbid(unsafe_code)]

pub mod payload;
mod server;
pub mod signature;

pub use payload::{Receipt, WebhookPayload, WebhookUpdate};
pub use server::{EventRelay, WebhookState, spawn_webhook_server};
pub use signature::{signature_header, verify_signature};
