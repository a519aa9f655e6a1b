//! Long-lived credential pair exchanged for access tokens.

// self
use crate::{_prelude::*, auth::Secret, error::ConfigError};

/// Client secret and refresh token supplied when a session is opened.
///
/// The refresh token is assumed stable for the lifetime of the session; it is never rotated
/// locally and never echoed in logs or errors.
#[derive(Clone)]
pub struct Credentials {
	client_secret: Secret,
	refresh_token: Secret,
}
impl Credentials {
	/// Validates and wraps the credential pair.
	pub fn new(
		client_secret: impl Into<Secret>,
		refresh_token: impl Into<Secret>,
	) -> Result<Self, ConfigError> {
		let client_secret = client_secret.into();
		let refresh_token = refresh_token.into();

		if client_secret.is_blank() {
			return Err(ConfigError::MissingSecret { field: "client secret" });
		}
		if refresh_token.is_blank() {
			return Err(ConfigError::MissingSecret { field: "refresh token" });
		}

		Ok(Self { client_secret, refresh_token })
	}

	/// Client secret issued to the OAuth application.
	pub fn client_secret(&self) -> &Secret {
		&self.client_secret
	}

	/// Refresh token granted to the end user.
	pub fn refresh_token(&self) -> &Secret {
		&self.refresh_token
	}
}
impl Debug for Credentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credentials")
			.field("client_secret", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rejects_blank_values() {
		assert!(matches!(
			Credentials::new("", "refresh"),
			Err(ConfigError::MissingSecret { field: "client secret" })
		));
		assert!(matches!(
			Credentials::new("secret", " "),
			Err(ConfigError::MissingSecret { field: "refresh token" })
		));
	}

	#[test]
	fn debug_output_never_contains_secrets() {
		let creds = Credentials::new("secret-value", "refresh-value")
			.expect("Credential fixture should validate.");
		let rendered = format!("{creds:?}");

		assert!(!rendered.contains("secret-value"));
		assert!(!rendered.contains("refresh-value"));
	}
}
