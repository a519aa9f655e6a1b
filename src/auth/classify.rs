//! Classification of token-endpoint failures into terminal and retryable outcomes.
//!
//! Structured OAuth fields (`error`, `error_description`) win, then the brokerage's
//! `{"error": {"code", "message"}}` envelope, and finally the HTTP status code. Network
//! failures and unparseable payloads are always retryable.

// self
use crate::_prelude::*;

/// Outcome category of a failed refresh exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshFailureKind {
	/// Refresh token revoked/invalid or client secret rejected; never retried.
	InvalidCredentials,
	/// Temporary failure; eligible for a bounded retry.
	Transient,
}

/// Primitive facts gathered from a failed refresh exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshErrorContext {
	/// HTTP status code returned by the authority, when available.
	pub http_status: Option<u16>,
	/// OAuth `error` field or envelope `code`.
	pub error_code: Option<String>,
	/// OAuth `error_description` field or envelope `message`.
	pub error_description: Option<String>,
	/// Whether a well-formed error payload was received at all.
	pub well_formed: bool,
	/// Whether the failure originated from the network layer.
	pub network_error: bool,
}
impl RefreshErrorContext {
	/// Context for a response carrying `status`.
	pub fn with_status(status: u16) -> Self {
		Self { http_status: Some(status), ..Default::default() }
	}

	/// Context for a transport-level failure.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Default::default() }
	}

	/// Records the machine-readable error code and marks the payload well formed.
	pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
		self.error_code = Some(code.into());
		self.well_formed = true;

		self
	}

	/// Records the human-readable description.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Marks the payload as well formed even without a code.
	pub fn well_formed(mut self) -> Self {
		self.well_formed = true;

		self
	}

	/// Reason string that is safe to surface: it only carries authority-supplied codes.
	pub fn reason(&self) -> String {
		match (&self.error_code, &self.error_description) {
			(Some(code), Some(description)) => format!("{code}: {description}"),
			(Some(code), None) => code.clone(),
			(None, Some(description)) => description.clone(),
			(None, None) => match self.http_status {
				Some(status) => format!("token endpoint answered HTTP {status}"),
				None => "token endpoint rejected the exchange".into(),
			},
		}
	}
}

/// Classifies a refresh failure.
pub fn classify_refresh_error(ctx: &RefreshErrorContext) -> RefreshFailureKind {
	if ctx.network_error || !ctx.well_formed {
		return RefreshFailureKind::Transient;
	}
	if let Some(kind) = ctx.error_code.as_deref().and_then(match_exact_value) {
		return kind;
	}
	if let Some(kind) = classify_text(ctx.error_description.as_deref()) {
		return kind;
	}

	classify_status(ctx.http_status)
}

fn match_exact_value(value: &str) -> Option<RefreshFailureKind> {
	const TERMINAL: [&str; 6] = [
		"invalid_grant",
		"invalid_client",
		"unauthorized_client",
		"access_denied",
		"invalid_token",
		"unsupported_grant_type",
	];
	const RETRYABLE: [&str; 2] = ["temporarily_unavailable", "server_error"];

	if TERMINAL.iter().any(|code| value.eq_ignore_ascii_case(code)) {
		Some(RefreshFailureKind::InvalidCredentials)
	} else if RETRYABLE.iter().any(|code| value.eq_ignore_ascii_case(code)) {
		Some(RefreshFailureKind::Transient)
	} else {
		None
	}
}

fn classify_text(text: Option<&str>) -> Option<RefreshFailureKind> {
	let lowered = text?.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant")
			|| text.contains("invalid_client")
			|| text.contains("revoked") =>
			Some(RefreshFailureKind::InvalidCredentials),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(RefreshFailureKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> RefreshFailureKind {
	match status {
		Some(400 | 401 | 403) => RefreshFailureKind::InvalidCredentials,
		_ => RefreshFailureKind::Transient,
	}
}
