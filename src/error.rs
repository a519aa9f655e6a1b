//! Session-level error taxonomy shared by the refresher, coordinator, client, and façade.

// self
use crate::_prelude::*;

/// Session-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Canonical session error exposed by public APIs.
///
/// Values are cheap to clone so one refresh outcome can be delivered to every caller that
/// waited on it.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary failure; the caller may retry later.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure on a protected-resource request (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The authority rejected the refresh token or client secret, or a freshly refreshed
	/// access token was still refused. New credentials are required.
	#[error("Credentials were rejected: {reason}.")]
	InvalidCredentials {
		/// Authority- or session-supplied reason string. Never contains secrets.
		reason: String,
	},
	/// A protected resource answered unauthorized and no corrective refresh was permitted.
	#[error("Authorization expired during the request.")]
	AuthorizationExpired,
	/// The session was closed before or during the call.
	#[error("Session is closed.")]
	Closed,
}
impl Error {
	/// Classifies the error into the coarse taxonomy callers branch on.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Config(_) => ErrorKind::Config,
			Self::Transient(_) => ErrorKind::Transient,
			Self::Transport(_) => ErrorKind::Transport,
			Self::InvalidCredentials { .. } => ErrorKind::InvalidCredentials,
			Self::AuthorizationExpired => ErrorKind::AuthorizationExpiredDuringRequest,
			Self::Closed => ErrorKind::Closed,
		}
	}

	/// Returns `true` when the failure must not be retried without outside intervention.
	pub fn is_terminal(&self) -> bool {
		self.kind().is_terminal()
	}
}

/// Coarse error categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Refresh token or client secret rejected.
	InvalidCredentials,
	/// Network, timeout, or malformed-response failure.
	Transient,
	/// A protected resource answered unauthorized.
	AuthorizationExpiredDuringRequest,
	/// Transport fault unrelated to credentials.
	Transport,
	/// Invalid local configuration.
	Config,
	/// Session already closed.
	Closed,
}
impl ErrorKind {
	/// Returns `true` for kinds that require new credentials or a new session.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::InvalidCredentials | Self::Config | Self::Closed)
	}
}

/// Configuration and validation failures raised while opening a session.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// A required secret was empty.
	#[error("The {field} must not be empty.")]
	MissingSecret {
		/// Name of the missing configuration field.
		field: &'static str,
	},
	/// Base URL cannot be used.
	#[error("Base URL is invalid.")]
	InvalidBaseUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request path does not resolve beneath the base URL.
	#[error("Request path `{path}` is invalid: it {reason}.")]
	InvalidPath {
		/// Offending path.
		path: String,
		/// Rule the path violated.
		reason: &'static str,
	},
	/// Remote endpoints must use HTTPS unless they point at a loopback host.
	#[error("The base URL must use HTTPS: {url}.")]
	InsecureBaseUrl {
		/// URL that failed validation.
		url: String,
	},
	/// An environment variable carried a value that could not be parsed.
	#[error("Environment variable `{name}` is invalid.")]
	InvalidEnv {
		/// Variable name.
		name: &'static str,
	},
	/// An environment variable required for the session is unset.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnv {
		/// Variable name.
		name: &'static str,
	},
	/// The refresh attempt budget must allow at least one call.
	#[error("The refresh attempt budget must be at least 1.")]
	ZeroRefreshAttempts,
	/// Header name or value supplied by a caller is invalid.
	#[error("Request header `{name}` is invalid.")]
	InvalidHeader {
		/// Offending header name.
		name: String,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	BodySerialize {
		/// Underlying serialization failure.
		#[source]
		source: Arc<serde_json::Error>,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Clone, Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Session-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Network failure while calling the token endpoint.
	#[error("Network error occurred while calling the token endpoint.")]
	TokenNetwork {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// A network operation exceeded its deadline.
	#[error("Request timed out while calling the {endpoint} endpoint.")]
	Timeout {
		/// Which kind of endpoint timed out.
		endpoint: &'static str,
	},
}
impl TransientError {
	/// Returns the upstream Retry-After hint, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::TokenEndpoint { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}

/// Transport-level failures (network, IO) on protected-resource requests.
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling a protected endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}

/// Maps a reqwest failure on a protected-resource request into the session taxonomy.
pub(crate) fn map_request_error(err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::http_client_build(err).into();
	}
	if err.is_timeout() {
		return TransientError::Timeout { endpoint: "protected" }.into();
	}

	TransportError::network(err).into()
}

/// Maps a reqwest failure on the token endpoint; every network fault there is retryable.
pub(crate) fn map_refresh_error(err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::http_client_build(err).into();
	}
	if err.is_timeout() {
		return TransientError::Timeout { endpoint: "token" }.into();
	}

	TransientError::TokenNetwork { source: Arc::new(err) }.into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn kinds_separate_terminal_from_retryable() {
		let invalid = Error::InvalidCredentials { reason: "invalid_grant".into() };
		let transient = Error::from(TransientError::Timeout { endpoint: "token" });

		assert_eq!(invalid.kind(), ErrorKind::InvalidCredentials);
		assert!(invalid.is_terminal());
		assert_eq!(transient.kind(), ErrorKind::Transient);
		assert!(!transient.is_terminal());
		assert!(Error::Closed.is_terminal());
		assert!(!Error::AuthorizationExpired.is_terminal());
	}

	#[test]
	fn cloned_errors_render_identically() {
		let err = Error::from(TransientError::TokenEndpoint {
			message: "server_error".into(),
			status: Some(503),
			retry_after: Some(Duration::seconds(2)),
		});
		let copy = err.clone();

		assert_eq!(err.to_string(), copy.to_string());
		assert!(matches!(copy, Error::Transient(ref t) if t.retry_after() == Some(Duration::seconds(2))));
	}
}
