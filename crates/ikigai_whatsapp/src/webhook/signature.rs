#![forbid(unsafe_code)]

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check an `X-Hub-Signature-256: sha256=<hex>` header against the raw request body.
pub fn verify_signature(app_secret: &[u8], body: &[u8], header: &str) -> bool {
	let Some(hex_sig) = header.trim().strip_prefix("sha256=") else {
		return false;
	};
	let Ok(provided) = hex::decode(hex_sig) else {
		return false;
	};
	constant_time_eq(&sign(app_secret, body), &provided)
}

/// Hex HMAC-SHA256 of `body`, formatted as the header value.
pub fn signature_header(app_secret: &[u8], body: &[u8]) -> String {
	format!("sha256={}", hex::encode(sign(app_secret, body)))
}

fn sign(secret: &[u8], body: &[u8]) -> Vec<u8> {
	// HMAC accepts keys of any length.
	let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
		return Vec::new();
	};
	mac.update(body);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() || a.is_empty() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}
