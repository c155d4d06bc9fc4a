#![forbid(unsafe_code)]

use std::time::Duration;

use ikigai_domain::UserId;
use ikigai_protocol::DecodeError;
use thiserror::Error;

/// Failure reported by a [`crate::Transport`] or one of its halves.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	/// The peer went away; a fresh connection may succeed.
	#[error("connection closed")]
	Closed,

	#[error("{0}")]
	Other(String),
}

impl TransportError {
	pub fn other(detail: impl Into<String>) -> Self {
		Self::Other(detail.into())
	}
}

#[derive(Debug, Error)]
pub enum RelayError {
	#[error("transport closed for user {user}")]
	TransportClosed { user: UserId },

	#[error("transport error for user {user}: {detail}")]
	TransportError { user: UserId, detail: String },

	#[error("malformed instruction: {0}")]
	MalformedInstruction(#[from] DecodeError),

	/// Soft: the caller proceeds as if the message was delivered.
	#[error("delivery not confirmed within {0:?}")]
	DeliveryTimeout(Duration),

	#[error("`{action}` handler failed: {detail}")]
	HandlerFailure { action: &'static str, detail: String },

	#[error("failed to encode frame: {0}")]
	Encode(#[from] serde_json::Error),
}

impl RelayError {
	pub(crate) fn transport(user: &UserId, err: TransportError) -> Self {
		match err {
			TransportError::Closed => Self::TransportClosed { user: user.clone() },
			TransportError::Other(detail) => Self::TransportError {
				user: user.clone(),
				detail,
			},
		}
	}

	/// Soft failures are logged and otherwise ignored.
	pub fn is_soft(&self) -> bool {
		matches!(self, Self::DeliveryTimeout(_))
	}

	pub fn is_transport(&self) -> bool {
		matches!(self, Self::TransportClosed { .. } | Self::TransportError { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn transport_errors_map_by_kind() {
		let user = UserId::new("351").unwrap();
		assert!(matches!(
			RelayError::transport(&user, TransportError::Closed),
			RelayError::TransportClosed { .. }
		));
		let err = RelayError::transport(&user, TransportError::other("tls handshake"));
		assert!(err.is_transport());
		assert_eq!(err.to_string(), "transport error for user 351: tls handshake");
	}

	#[test]
	fn only_delivery_timeout_is_soft() {
		assert!(RelayError::DeliveryTimeout(Duration::from_secs(1)).is_soft());
		assert!(
			!RelayError::HandlerFailure {
				action: "message",
				detail: "boom".into()
			}
			.is_soft()
		);
	}
}
