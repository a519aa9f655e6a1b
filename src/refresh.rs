//! Refresh-token grant exchange and its single-flight coordinator.
//!
//! [`Refresher`] is the seam between the session and the authorization server: a pure
//! exchange of [`Credentials`] for a new [`TokenState`]. [`OAuthRefresher`] implements it
//! over reqwest against the brokerage's `/oauth/token` endpoint, while
//! [`RefreshCoordinator`] guarantees that at most one exchange is outstanding per session.

pub mod coordinator;

mod metrics;

pub use coordinator::*;
pub use metrics::RefreshMetrics;

// crates.io
use oauth2::{
	TokenResponse,
	basic::{BasicErrorResponse, BasicTokenResponse},
};
use reqwest::{
	StatusCode,
	header::{ACCEPT, HeaderMap, RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	api::ErrorEnvelope,
	auth::{
		Credentials, RefreshErrorContext, RefreshFailureKind, TokenState, classify_refresh_error,
	},
	clock::Clock,
	config,
	error::{self, TransientError},
};

/// Path of the token endpoint relative to the API base URL.
pub const TOKEN_PATH: &str = "/oauth/token";

/// Boxed future returned by [`Refresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenState>> + 'a + Send>>;

/// Performs the OAuth 2.0 refresh-token grant.
///
/// Implementations issue exactly one exchange per call and never retry on their own; retry
/// budgets belong to [`RefreshCoordinator`]. Failures must be classified as
/// [`Error::InvalidCredentials`] (terminal) or [`Error::Transient`].
pub trait Refresher
where
	Self: 'static + Send + Sync,
{
	/// Exchanges `credentials` for a fresh access token.
	fn refresh<'a>(&'a self, credentials: &'a Credentials) -> RefreshFuture<'a>;
}

/// reqwest-backed [`Refresher`] for the brokerage token endpoint.
///
/// Token requests do not follow redirects; configure any custom [`ReqwestClient`] passed to
/// [`OAuthRefresher::new`] accordingly.
#[derive(Clone)]
pub struct OAuthRefresher {
	http_client: ReqwestClient,
	token_url: Url,
	clock: Arc<dyn Clock>,
	margin: Duration,
	timeout: std::time::Duration,
}
impl OAuthRefresher {
	/// Creates a refresher posting to `oauth/token` beneath `base_url`'s path.
	pub fn new(
		http_client: ReqwestClient,
		base_url: &Url,
		clock: Arc<dyn Clock>,
		margin: Duration,
		timeout: std::time::Duration,
	) -> Result<Self> {
		let token_url = config::resolve_path(base_url, TOKEN_PATH)?;

		Ok(Self { http_client, token_url, clock, margin, timeout })
	}

	/// Token endpoint targeted by this refresher.
	pub fn token_url(&self) -> &Url {
		&self.token_url
	}

	async fn exchange(&self, credentials: &Credentials) -> Result<TokenState> {
		let requested_at = self.clock.now();
		let form = [
			("grant_type", "refresh_token"),
			("refresh_token", credentials.refresh_token().expose()),
			("client_secret", credentials.client_secret().expose()),
		];
		let response = self
			.http_client
			.post(self.token_url.clone())
			.header(ACCEPT, "application/json")
			.form(&form)
			.timeout(self.timeout)
			.send()
			.await
			.map_err(error::map_refresh_error)?;
		let status = response.status();
		let retry_after = parse_retry_after(response.headers(), requested_at);
		let body = response.bytes().await.map_err(error::map_refresh_error)?;

		if status.is_success() {
			parse_token_response(&body, status, requested_at, self.margin)
		} else {
			Err(map_error_response(&body, status, retry_after))
		}
	}
}
impl Refresher for OAuthRefresher {
	fn refresh<'a>(&'a self, credentials: &'a Credentials) -> RefreshFuture<'a> {
		Box::pin(self.exchange(credentials))
	}
}
impl Debug for OAuthRefresher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthRefresher")
			.field("token_url", &self.token_url.as_str())
			.field("margin", &self.margin)
			.field("timeout", &self.timeout)
			.finish()
	}
}

fn parse_token_response(
	body: &[u8],
	status: StatusCode,
	requested_at: OffsetDateTime,
	margin: Duration,
) -> Result<TokenState> {
	let mut de = serde_json::Deserializer::from_slice(body);
	let response: BasicTokenResponse = serde_path_to_error::deserialize(&mut de).map_err(|e| {
		TransientError::TokenResponseParse { source: Arc::new(e), status: Some(status.as_u16()) }
	})?;
	let lifetime = response.expires_in().ok_or_else(|| TransientError::TokenEndpoint {
		message: "response is missing expires_in".into(),
		status: Some(status.as_u16()),
		retry_after: None,
	})?;
	let lifetime = i64::try_from(lifetime.as_secs()).map_err(|_| TransientError::TokenEndpoint {
		message: "expires_in exceeds the supported range".into(),
		status: Some(status.as_u16()),
		retry_after: None,
	})?;

	TokenState::from_lifetime(
		response.access_token().secret().to_owned(),
		response.token_type().as_ref(),
		requested_at,
		Duration::seconds(lifetime),
		margin,
	)
}

fn map_error_response(body: &[u8], status: StatusCode, retry_after: Option<Duration>) -> Error {
	let ctx = error_context(body, status.as_u16());
	let reason = ctx.reason();

	match classify_refresh_error(&ctx) {
		RefreshFailureKind::InvalidCredentials => Error::InvalidCredentials { reason },
		RefreshFailureKind::Transient => TransientError::TokenEndpoint {
			message: reason,
			status: Some(status.as_u16()),
			retry_after,
		}
		.into(),
	}
}

fn error_context(body: &[u8], status: u16) -> RefreshErrorContext {
	let ctx = RefreshErrorContext::with_status(status);

	if let Ok(response) = serde_json::from_slice::<BasicErrorResponse>(body) {
		let ctx = ctx.with_error_code(response.error().as_ref());

		return match response.error_description() {
			Some(description) => ctx.with_error_description(description.as_str()),
			None => ctx,
		};
	}
	if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
		let mut ctx = ctx.well_formed();

		if let Some(code) = envelope.error.code {
			ctx = ctx.with_error_code(code);
		}
		if let Some(message) = envelope.error.message {
			ctx = ctx.with_error_description(message);
		}

		return ctx;
	}

	ctx
}

fn parse_retry_after(headers: &HeaderMap, now: OffsetDateTime) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(secs.into()));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
