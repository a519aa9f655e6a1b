//! Session configuration, environment presets, and validation.

// std
use std::net::IpAddr;
// self
use crate::{
	_prelude::*,
	auth::{Credentials, Secret},
	error::ConfigError,
	refresh::RefreshPolicy,
};

/// Brokerage API environments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
	/// Live trading environment.
	#[default]
	Production,
	/// Certification sandbox.
	Sandbox,
}
impl Environment {
	/// Base URL of the environment's REST API.
	pub const fn base_url(self) -> &'static str {
		match self {
			Self::Production => "https://api.tastyworks.com",
			Self::Sandbox => "https://api.cert.tastyworks.com",
		}
	}

	/// Parsed base URL of the environment's REST API.
	pub fn url(self) -> Result<Url, ConfigError> {
		Url::parse(self.base_url()).map_err(|source| ConfigError::InvalidBaseUrl { source })
	}

	fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"production" | "prod" | "live" => Some(Self::Production),
			"sandbox" | "cert" => Some(Self::Sandbox),
			_ => None,
		}
	}
}

/// Everything needed to open a [`Session`](crate::Session).
///
/// Secrets are redacted from `Debug` output and are never serialized back out. When
/// deserialized, `base_url` falls back to `environment` (production by default) and the
/// result is validated.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "SessionConfigFields")]
pub struct SessionConfig {
	/// OAuth client secret.
	pub client_secret: Secret,
	/// Long-lived refresh token.
	pub refresh_token: Secret,
	/// API base URL. Request paths are appended to its path.
	pub base_url: Url,
	/// Seconds subtracted from every token lifetime to absorb clock skew and latency.
	pub clock_skew_margin_secs: u32,
	/// Corrective refresh-and-resend cycles allowed after an unauthorized response.
	pub max_auth_retries: u32,
	/// Refresher calls allowed per refresh round (transient failures only are retried).
	pub refresh_attempts: u32,
	/// Initial backoff between refresh attempts, in milliseconds; doubles per retry.
	pub refresh_backoff_ms: u64,
	/// Default deadline for every network operation, in milliseconds.
	pub request_timeout_ms: u64,
	/// User-Agent sent with every request.
	pub user_agent: String,
}
impl SessionConfig {
	const ENV_CLIENT_SECRET: &'static str = "TASTYTRADE_CLIENT_SECRET";
	const ENV_REFRESH_TOKEN: &'static str = "TASTYTRADE_REFRESH_TOKEN";
	const ENV_BASE_URL: &'static str = "TASTYTRADE_BASE_URL";
	const ENV_ENVIRONMENT: &'static str = "TASTYTRADE_ENVIRONMENT";
	const ENV_CLOCK_SKEW_MARGIN: &'static str = "TASTYTRADE_CLOCK_SKEW_MARGIN_SECS";
	const ENV_MAX_AUTH_RETRIES: &'static str = "TASTYTRADE_MAX_AUTH_RETRIES";

	/// Returns a builder seeded with the required secrets and default options.
	pub fn builder(
		client_secret: impl Into<Secret>,
		refresh_token: impl Into<Secret>,
	) -> SessionConfigBuilder {
		SessionConfigBuilder { fields: SessionConfigFields::new(client_secret.into(), refresh_token.into()) }
	}

	/// Loads configuration from `TASTYTRADE_*` environment variables.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads configuration through `lookup`, which maps variable names to values.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let required = |name: &'static str| {
			lookup(name).filter(|value| !value.trim().is_empty()).ok_or(ConfigError::MissingEnv { name })
		};
		let mut builder =
			Self::builder(required(Self::ENV_CLIENT_SECRET)?, required(Self::ENV_REFRESH_TOKEN)?);

		if let Some(raw) = lookup(Self::ENV_ENVIRONMENT) {
			let environment = Environment::parse(&raw)
				.ok_or(ConfigError::InvalidEnv { name: Self::ENV_ENVIRONMENT })?;

			builder = builder.environment(environment);
		}
		if let Some(raw) = lookup(Self::ENV_BASE_URL) {
			let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidBaseUrl { source })?;

			builder = builder.base_url(url);
		}
		if let Some(raw) = lookup(Self::ENV_CLOCK_SKEW_MARGIN) {
			let secs = raw
				.trim()
				.parse()
				.map_err(|_| ConfigError::InvalidEnv { name: Self::ENV_CLOCK_SKEW_MARGIN })?;

			builder = builder.clock_skew_margin_secs(secs);
		}
		if let Some(raw) = lookup(Self::ENV_MAX_AUTH_RETRIES) {
			let retries = raw
				.trim()
				.parse()
				.map_err(|_| ConfigError::InvalidEnv { name: Self::ENV_MAX_AUTH_RETRIES })?;

			builder = builder.max_auth_retries(retries);
		}

		builder.build()
	}

	/// Checks invariants that deserialization alone cannot enforce.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.credentials()?;

		let loopback = match self.base_url.host() {
			Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
			Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
			Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
			None => false,
		};

		if self.base_url.scheme() != "https" && !(self.base_url.scheme() == "http" && loopback) {
			return Err(ConfigError::InsecureBaseUrl { url: self.base_url.to_string() });
		}
		if self.refresh_attempts == 0 {
			return Err(ConfigError::ZeroRefreshAttempts);
		}

		Ok(())
	}

	/// Validated credential pair.
	pub fn credentials(&self) -> Result<Credentials, ConfigError> {
		Credentials::new(self.client_secret.clone(), self.refresh_token.clone())
	}

	/// Clock skew margin as a duration.
	pub fn clock_skew_margin(&self) -> Duration {
		Duration::seconds(self.clock_skew_margin_secs.into())
	}

	/// Default network deadline.
	pub fn request_timeout(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.request_timeout_ms)
	}

	/// Refresh retry budget derived from the configuration.
	pub fn refresh_policy(&self) -> RefreshPolicy {
		RefreshPolicy {
			attempts: self.refresh_attempts,
			backoff: std::time::Duration::from_millis(self.refresh_backoff_ms),
			timeout: self.request_timeout(),
		}
	}
}
impl TryFrom<SessionConfigFields> for SessionConfig {
	type Error = ConfigError;

	fn try_from(fields: SessionConfigFields) -> Result<Self, Self::Error> {
		let base_url = match fields.base_url {
			Some(url) => url,
			None => fields.environment.url()?,
		};
		let config = Self {
			client_secret: fields.client_secret,
			refresh_token: fields.refresh_token,
			base_url,
			clock_skew_margin_secs: fields.clock_skew_margin_secs,
			max_auth_retries: fields.max_auth_retries,
			refresh_attempts: fields.refresh_attempts,
			refresh_backoff_ms: fields.refresh_backoff_ms,
			request_timeout_ms: fields.request_timeout_ms,
			user_agent: fields.user_agent,
		};

		config.validate()?;

		Ok(config)
	}
}

/// Builder for [`SessionConfig`] values.
#[derive(Debug)]
pub struct SessionConfigBuilder {
	fields: SessionConfigFields,
}
impl SessionConfigBuilder {
	/// Targets one of the preset environments, replacing any explicit base URL.
	pub fn environment(mut self, environment: Environment) -> Self {
		self.fields.environment = environment;
		self.fields.base_url = None;

		self
	}

	/// Overrides the API base URL (sandbox or test server).
	pub fn base_url(mut self, url: Url) -> Self {
		self.fields.base_url = Some(url);

		self
	}

	/// Overrides the clock skew margin.
	pub fn clock_skew_margin_secs(mut self, secs: u32) -> Self {
		self.fields.clock_skew_margin_secs = secs;

		self
	}

	/// Overrides the corrective cycle budget after unauthorized responses.
	pub fn max_auth_retries(mut self, retries: u32) -> Self {
		self.fields.max_auth_retries = retries;

		self
	}

	/// Overrides the number of refresher calls per refresh round.
	pub fn refresh_attempts(mut self, attempts: u32) -> Self {
		self.fields.refresh_attempts = attempts;

		self
	}

	/// Overrides the initial refresh backoff (millisecond precision).
	pub fn refresh_backoff(mut self, backoff: std::time::Duration) -> Self {
		self.fields.refresh_backoff_ms = millis(backoff);

		self
	}

	/// Overrides the default network deadline (millisecond precision).
	pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
		self.fields.request_timeout_ms = millis(timeout);

		self
	}

	/// Overrides the User-Agent header.
	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.fields.user_agent = user_agent.into();

		self
	}

	/// Validates and returns the configuration.
	pub fn build(self) -> Result<SessionConfig, ConfigError> {
		SessionConfig::try_from(self.fields)
	}
}

// Unvalidated form shared by the builder and deserialization.
#[derive(Debug, Deserialize)]
struct SessionConfigFields {
	client_secret: Secret,
	refresh_token: Secret,
	#[serde(default)]
	environment: Environment,
	#[serde(default)]
	base_url: Option<Url>,
	#[serde(default = "default_clock_skew_margin_secs")]
	clock_skew_margin_secs: u32,
	#[serde(default = "default_max_auth_retries")]
	max_auth_retries: u32,
	#[serde(default = "default_refresh_attempts")]
	refresh_attempts: u32,
	#[serde(default = "default_refresh_backoff_ms")]
	refresh_backoff_ms: u64,
	#[serde(default = "default_request_timeout_ms")]
	request_timeout_ms: u64,
	#[serde(default = "default_user_agent")]
	user_agent: String,
}
impl SessionConfigFields {
	fn new(client_secret: Secret, refresh_token: Secret) -> Self {
		Self {
			client_secret,
			refresh_token,
			environment: Environment::default(),
			base_url: None,
			clock_skew_margin_secs: default_clock_skew_margin_secs(),
			max_auth_retries: default_max_auth_retries(),
			refresh_attempts: default_refresh_attempts(),
			refresh_backoff_ms: default_refresh_backoff_ms(),
			request_timeout_ms: default_request_timeout_ms(),
			user_agent: default_user_agent(),
		}
	}
}

/// Resolves an absolute request path (`/customers/me?x=1`) beneath `base_url`.
///
/// Only paths starting with a single `/` are accepted, so the result always shares the base
/// URL's scheme, host, and port; any path prefix on the base URL is preserved.
pub fn resolve_path(base_url: &Url, path: &str) -> Result<Url, ConfigError> {
	let invalid = |reason| ConfigError::InvalidPath { path: path.to_owned(), reason };

	if !path.starts_with('/') || path.starts_with("//") {
		return Err(invalid("must start with a single `/`"));
	}
	if path.contains(['#', '\\']) {
		return Err(invalid("must not contain `#` or `\\`"));
	}

	let (path_part, query) = match path.split_once('?') {
		Some((path_part, query)) => (path_part, Some(query)),
		None => (path, None),
	};
	let mut url = base_url.clone();

	url.set_path(&format!("{}{path_part}", base_url.path().trim_end_matches('/')));
	url.set_query(query);
	url.set_fragment(None);

	if url.origin() != base_url.origin() {
		return Err(invalid("must stay on the base URL's origin"));
	}

	Ok(url)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: std::time::Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_clock_skew_margin_secs() -> u32 {
	30
}

fn default_max_auth_retries() -> u32 {
	1
}

fn default_refresh_attempts() -> u32 {
	2
}

fn default_refresh_backoff_ms() -> u64 {
	250
}

fn default_request_timeout_ms() -> u64 {
	30_000
}

fn default_user_agent() -> String {
	concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).into()
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashMap;
	// self
	use super::*;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> =
			pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();

		move |name| vars.get(name).cloned()
	}

	#[test]
	fn defaults_target_production() {
		let config = SessionConfig::builder("secret", "refresh")
			.build()
			.expect("Default configuration should validate.");

		assert_eq!(config.base_url.as_str(), "https://api.tastyworks.com/");
		assert_eq!(config.clock_skew_margin(), Duration::seconds(30));
		assert_eq!(config.max_auth_retries, 1);
		assert_eq!(config.refresh_policy().attempts, 2);
	}

	#[test]
	fn rejects_insecure_remote_urls_but_allows_loopback() {
		let err = SessionConfig::builder("secret", "refresh")
			.base_url(Url::parse("http://api.example.com").expect("URL fixture should parse."))
			.build()
			.expect_err("Plain HTTP to a remote host should be rejected.");

		assert!(matches!(err, ConfigError::InsecureBaseUrl { .. }));

		SessionConfig::builder("secret", "refresh")
			.base_url(Url::parse("http://127.0.0.1:8080").expect("URL fixture should parse."))
			.build()
			.expect("Loopback HTTP should be accepted.");
	}

	#[test]
	fn rejects_zero_refresh_attempts_and_blank_secrets() {
		let err = SessionConfig::builder("secret", "refresh")
			.refresh_attempts(0)
			.build()
			.expect_err("Zero attempts should be rejected.");

		assert!(matches!(err, ConfigError::ZeroRefreshAttempts));

		let err = SessionConfig::builder("", "refresh")
			.build()
			.expect_err("Blank client secret should be rejected.");

		assert!(matches!(err, ConfigError::MissingSecret { .. }));
	}

	#[test]
	fn loads_from_environment_lookup() {
		let config = SessionConfig::from_lookup(lookup(&[
			("TASTYTRADE_CLIENT_SECRET", "secret"),
			("TASTYTRADE_REFRESH_TOKEN", "refresh"),
			("TASTYTRADE_ENVIRONMENT", "sandbox"),
			("TASTYTRADE_CLOCK_SKEW_MARGIN_SECS", "45"),
			("TASTYTRADE_MAX_AUTH_RETRIES", "0"),
		]))
		.expect("Environment configuration should load.");

		assert_eq!(config.base_url.as_str(), "https://api.cert.tastyworks.com/");
		assert_eq!(config.clock_skew_margin_secs, 45);
		assert_eq!(config.max_auth_retries, 0);

		let err = SessionConfig::from_lookup(lookup(&[("TASTYTRADE_CLIENT_SECRET", "secret")]))
			.expect_err("Missing refresh token should fail.");

		assert!(matches!(err, ConfigError::MissingEnv { name: "TASTYTRADE_REFRESH_TOKEN" }));

		let err = SessionConfig::from_lookup(lookup(&[
			("TASTYTRADE_CLIENT_SECRET", "secret"),
			("TASTYTRADE_REFRESH_TOKEN", "refresh"),
			("TASTYTRADE_MAX_AUTH_RETRIES", "many"),
		]))
		.expect_err("Unparseable retry budget should fail.");

		assert!(matches!(err, ConfigError::InvalidEnv { name: "TASTYTRADE_MAX_AUTH_RETRIES" }));
	}

	#[test]
	fn deserializes_with_defaults() {
		let config: SessionConfig = serde_json::from_str(
			r#"{"client_secret":"secret","refresh_token":"refresh","max_auth_retries":2}"#,
		)
		.expect("Minimal JSON configuration should deserialize.");

		assert_eq!(config.max_auth_retries, 2);
		assert_eq!(config.refresh_attempts, 2);
		assert_eq!(config.base_url.as_str(), "https://api.tastyworks.com/");
		assert_eq!(format!("{:?}", config.refresh_token), "Secret(\"<redacted>\")");
	}

	#[test]
	fn request_timeout_keeps_millisecond_precision() {
		let config = SessionConfig::builder("secret", "refresh")
			.request_timeout(std::time::Duration::from_millis(1_500))
			.build()
			.expect("Configuration should validate.");

		assert_eq!(config.request_timeout(), std::time::Duration::from_millis(1_500));
		assert_eq!(config.refresh_policy().timeout, std::time::Duration::from_millis(1_500));
	}

	#[test]
	fn millis_saturates_instead_of_truncating() {
		assert_eq!(millis(std::time::Duration::from_millis(1_500)), 1_500);
		assert_eq!(millis(std::time::Duration::MAX), u64::MAX);
	}

	#[test]
	fn environment_presets_parse_and_deserialize() {
		assert_eq!(
			Environment::Sandbox.url().map(|url| url.to_string()).ok().as_deref(),
			Some("https://api.cert.tastyworks.com/")
		);

		let config: SessionConfig = serde_json::from_str(
			r#"{"client_secret":"secret","refresh_token":"refresh","environment":"sandbox"}"#,
		)
		.expect("Sandbox JSON configuration should deserialize.");

		assert_eq!(config.base_url.as_str(), "https://api.cert.tastyworks.com/");

		let err = serde_json::from_str::<SessionConfig>(
			r#"{"client_secret":"","refresh_token":"refresh"}"#,
		)
		.expect_err("Deserialization should run validation.");

		assert!(err.to_string().contains("client secret"));
	}

	#[test]
	fn paths_resolve_beneath_the_base_url() {
		let base = Url::parse("https://api.example.com/v1/").expect("URL fixture should parse.");
		let url = resolve_path(&base, "/customers/me?include=accounts")
			.expect("Relative API path should resolve.");

		assert_eq!(url.as_str(), "https://api.example.com/v1/customers/me?include=accounts");

		let bare = Url::parse("https://api.example.com").expect("URL fixture should parse.");

		assert_eq!(
			resolve_path(&bare, "/oauth/token").map(|url| url.to_string()).ok().as_deref(),
			Some("https://api.example.com/oauth/token")
		);

		for path in [
			"https://evil.example.com/steal",
			"//evil.example.com/steal",
			"customers/me",
			"/\\evil.example.com/steal",
			"/x#frag",
			"",
		] {
			let err = resolve_path(&base, path).expect_err("Off-origin or relative paths should fail.");

			assert!(matches!(err, ConfigError::InvalidPath { path: ref p, .. } if p == path));
		}
	}
}
