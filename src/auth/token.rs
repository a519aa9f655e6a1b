//! Immutable access-token snapshots.

// self
use crate::{_prelude::*, auth::Secret, error::TransientError};

/// Lifecycle status of a [`TokenState`] at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
	/// The token may be attached to requests.
	Active,
	/// The token reached its (margin-adjusted) expiry.
	Expired,
}

/// Immutable snapshot of an issued access token.
///
/// A refresh produces a brand-new value; existing snapshots are never modified, so a reader
/// holding one can never observe a half-updated token.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenState {
	access_token: Secret,
	token_type: String,
	issued_at: OffsetDateTime,
	expires_at: OffsetDateTime,
}
impl TokenState {
	/// Creates a snapshot from explicit instants.
	pub fn new(
		access_token: impl Into<Secret>,
		token_type: impl Into<String>,
		issued_at: OffsetDateTime,
		expires_at: OffsetDateTime,
	) -> Self {
		Self { access_token: access_token.into(), token_type: token_type.into(), issued_at, expires_at }
	}

	/// Builds a snapshot from an authority-declared lifetime.
	///
	/// `requested_at` must be captured before the exchange was dispatched, so the resulting
	/// expiry lands strictly before the authority's own expiry minus `margin`.
	pub fn from_lifetime(
		access_token: impl Into<Secret>,
		token_type: impl Into<String>,
		requested_at: OffsetDateTime,
		lifetime: Duration,
		margin: Duration,
	) -> Result<Self> {
		if !lifetime.is_positive() {
			return Err(TransientError::TokenEndpoint {
				message: "expires_in must be positive".into(),
				status: None,
				retry_after: None,
			}
			.into());
		}
		if lifetime <= margin {
			return Err(TransientError::TokenEndpoint {
				message: "expires_in does not exceed the clock skew margin".into(),
				status: None,
				retry_after: None,
			}
			.into());
		}

		Ok(Self::new(access_token, token_type, requested_at, requested_at + lifetime - margin))
	}

	/// Bearer credential; callers must avoid logging it.
	pub fn access_token(&self) -> &Secret {
		&self.access_token
	}

	/// Token type reported by the authority (typically `Bearer`).
	pub fn token_type(&self) -> &str {
		&self.token_type
	}

	/// Instant the exchange that produced this token was dispatched.
	pub fn issued_at(&self) -> OffsetDateTime {
		self.issued_at
	}

	/// Instant after which the token must be treated as invalid.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Computes the status at `instant`.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if instant < self.expires_at { TokenStatus::Active } else { TokenStatus::Expired }
	}

	/// Returns `true` while `instant` is before the expiry.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Active)
	}

	/// Remaining validity at `instant`, clamped at zero.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		let remaining = self.expires_at - instant;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}
}
impl Debug for TokenState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenState")
			.field("access_token", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
