#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown channel kind: {0}")]
	UnknownChannelKind(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Channel-side user identifier (a WhatsApp `wa_id`, for instance).
///
/// This is the session key: one connection and one instruction queue hang off each value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`. Surrounding whitespace is dropped.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let trimmed = id.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if trimmed.len() == id.len() {
			Ok(Self(id))
		} else {
			Ok(Self(trimmed.to_string()))
		}
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

/// Name the backend knows this relay by (`whatsapp`).
///
/// Lowercase ASCII letters, digits, `_` and `-` only, since it is used as a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlatformName(String);

impl PlatformName {
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into().trim().to_ascii_lowercase();
		if name.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
			return Err(ParseIdError::InvalidFormat(format!("platform name `{name}`")));
		}
		Ok(Self(name))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for PlatformName {
	fn default() -> Self {
		Self("whatsapp".to_string())
	}
}

impl fmt::Display for PlatformName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for PlatformName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		PlatformName::new(s)
	}
}

impl TryFrom<String> for PlatformName {
	type Error = ParseIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		PlatformName::new(value)
	}
}

impl From<PlatformName> for String {
	fn from(value: PlatformName) -> Self {
		value.0
	}
}

/// Channel-native message identifier, used to correlate delivery receipts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMessageId(String);

impl ChannelMessageId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChannelMessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Conversation kind reported to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
	#[default]
	Dm,
	Channel,
}

impl ChannelKind {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ChannelKind::Dm => "dm",
			ChannelKind::Channel => "channel",
		}
	}
}

impl fmt::Display for ChannelKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ChannelKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		match s.to_ascii_lowercase().as_str() {
			"dm" | "direct" => Ok(ChannelKind::Dm),
			"channel" => Ok(ChannelKind::Channel),
			other => Err(ParseIdError::UnknownChannelKind(other.to_string())),
		}
	}
}
