#![forbid(unsafe_code)]

pub mod endpoint {
	use std::fmt;

	use url::Url;

	/// URL scheme accepted for a backend endpoint.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub enum Scheme {
		Ws,
		Wss,
		Http,
		Https,
	}

	impl Scheme {
		pub const fn as_str(self) -> &'static str {
			match self {
				Scheme::Ws => "ws",
				Scheme::Wss => "wss",
				Scheme::Http => "http",
				Scheme::Https => "https",
			}
		}

		/// `true` for `ws`/`wss`.
		pub const fn is_streaming(self) -> bool {
			matches!(self, Scheme::Ws | Scheme::Wss)
		}

		fn parse(s: &str) -> Option<Self> {
			match s {
				"ws" => Some(Scheme::Ws),
				"wss" => Some(Scheme::Wss),
				"http" => Some(Scheme::Http),
				"https" => Some(Scheme::Https),
				_ => None,
			}
		}
	}

	/// Parsed backend base URL such as `ws://electro:8000` or `https://api.example.com/ikigai`.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct BackendEndpoint {
		pub scheme: Scheme,
		base: Url,
	}

	impl BackendEndpoint {
		/// Parse `scheme://host[:port][/base/path]`. Credentials, query strings and fragments are rejected.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected ws://, wss://, http:// or https://)".to_string());
			}

			let base = Url::parse(s).map_err(|e| format!("invalid endpoint `{s}`: {e}"))?;
			let scheme =
				Scheme::parse(base.scheme()).ok_or_else(|| format!("unsupported endpoint scheme `{}`: {s}", base.scheme()))?;

			if base.host_str().is_none_or(str::is_empty) || base.cannot_be_a_base() {
				return Err(format!("invalid endpoint host: {s}"));
			}
			if !base.username().is_empty() || base.password().is_some() {
				return Err(format!("invalid endpoint (credentials in URL not allowed): {s}"));
			}
			if base.query().is_some() || base.fragment().is_some() {
				return Err(format!("invalid endpoint (query/fragment not allowed): {s}"));
			}
			if base.port() == Some(0) {
				return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
			}

			Ok(Self { scheme, base })
		}

		/// Parse and require a `ws`/`wss` scheme.
		pub fn parse_streaming(s: &str) -> Result<Self, String> {
			let e = Self::parse(s)?;
			if !e.scheme.is_streaming() {
				return Err(format!("expected ws:// or wss:// endpoint, got {}://", e.scheme.as_str()));
			}
			Ok(e)
		}

		/// Parse and require an `http`/`https` scheme.
		pub fn parse_http(s: &str) -> Result<Self, String> {
			let e = Self::parse(s)?;
			if e.scheme.is_streaming() {
				return Err(format!("expected http:// or https:// endpoint, got {}://", e.scheme.as_str()));
			}
			Ok(e)
		}

		/// Host plus non-default port, IPv6 bracketed.
		pub fn authority(&self) -> String {
			let host = self.base.host_str().unwrap_or_default();
			match self.base.port() {
				Some(port) => format!("{host}:{port}"),
				None => host.to_string(),
			}
		}

		/// Base path without a trailing slash (empty for the root).
		pub fn base_path(&self) -> &str {
			self.base.path().trim_end_matches('/')
		}

		/// Append percent-encoded path segments to the base URL.
		pub fn join<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
			let mut url = self.base.clone();
			// Every parsed base has a host, so it can always take path segments.
			if let Ok(mut path) = url.path_segments_mut() {
				path.pop_if_empty().extend(segments);
			}
			url
		}

		/// `{base}/websocket/platform/{platform}/{user}`: one streaming connection per user.
		pub fn user_stream_url(&self, platform: &str, user: &str) -> String {
			self.join(["websocket", "platform", platform, user]).into()
		}

		/// `{base}/platform/{platform}/{action}`: one request per outbound event.
		pub fn event_url(&self, platform: &str, action: &str) -> String {
			self.join(["platform", platform, action]).into()
		}
	}

	impl fmt::Display for BackendEndpoint {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str(self.base.as_str().trim_end_matches('/'))
		}
	}

}
