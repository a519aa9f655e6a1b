//! Session façade: open, authenticated requests, and deterministic close.

// crates.io
use reqwest::{Response, redirect::Policy};
// self
use crate::{
	_prelude::*,
	client::{ApiRequest, AuthenticatedClient},
	clock::{Clock, SystemClock},
	config::SessionConfig,
	error::ConfigError,
	obs::{self, OpKind, OpOutcome},
	refresh::{OAuthRefresher, RefreshCoordinator, Refresher},
};

/// Authenticated session over one client secret and refresh token.
///
/// Cloning is cheap and every clone shares the same token slot. [`Session::close`] on any
/// clone closes them all; afterwards every operation fails with [`Error::Closed`].
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}
impl Session {
	/// Opens a session on the system clock. No network call is made until the first request.
	pub fn open(config: SessionConfig) -> Result<Self> {
		Self::open_with_clock(config, Arc::new(SystemClock))
	}

	/// Opens a session that reads time from `clock`.
	pub fn open_with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
		config.validate()?;

		let http_client = build_http_client(&config)?;
		let refresher = OAuthRefresher::new(
			http_client.clone(),
			&config.base_url,
			clock.clone(),
			config.clock_skew_margin(),
			config.request_timeout(),
		)?;

		Self::assemble(config, http_client, Arc::new(refresher), clock)
	}

	/// Opens a session whose tokens come from a caller-supplied [`Refresher`].
	pub fn open_with_refresher(
		config: SessionConfig,
		refresher: Arc<dyn Refresher>,
		clock: Arc<dyn Clock>,
	) -> Result<Self> {
		config.validate()?;

		let http_client = build_http_client(&config)?;

		Self::assemble(config, http_client, refresher, clock)
	}

	/// Runs `f` with a freshly opened session and closes it on every exit path.
	///
	/// The session passed to `f` is closed once `f`'s future completes, whether it returned
	/// `Ok` or `Err`. Clones that escape the scope observe [`Error::Closed`].
	pub async fn scoped<F, Fut, T, E>(config: SessionConfig, f: F) -> Result<T, E>
	where
		F: FnOnce(Session) -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: From<Error>,
	{
		let session = Self::open(config)?;
		let guard = CloseGuard(session.clone());
		let result = f(session).await;

		drop(guard);

		result
	}

	/// Sends `request` with a valid bearer token, recovering from one stale-token `401`.
	///
	/// Non-`401` responses, errors included, are returned exactly as received.
	pub async fn request(&self, request: ApiRequest) -> Result<Response> {
		self.client()?.request(&request).await
	}

	/// Shorthand for a `GET` on `path`.
	pub async fn get(&self, path: &str) -> Result<Response> {
		self.request(ApiRequest::get(path)).await
	}

	/// Forces a new refresh round even if the cached token is still valid.
	///
	/// Joins an outstanding round instead of starting a second one.
	pub async fn refresh(&self) -> Result<()> {
		self.client()?.coordinator().force_refresh().await.map(|_| ())
	}

	/// Returns `true` when a cached access token is valid right now. Never touches the network.
	pub fn is_logged_in(&self) -> bool {
		self.client().is_ok_and(|client| client.coordinator().cached().is_some())
	}

	/// Expiry of the cached access token, if one is valid right now.
	pub fn token_expires_at(&self) -> Option<OffsetDateTime> {
		self.client().ok()?.coordinator().cached().map(|token| token.expires_at())
	}

	/// Closes the session and drops its connection pool. Safe to call repeatedly.
	///
	/// Requests already in progress run to completion. The refresh token is not revoked.
	pub fn close(&self) {
		let Some(client) = self.inner.client.write().take() else {
			return;
		};

		client.coordinator().clear();
		obs::record_op_outcome(OpKind::Close, OpOutcome::Success);
		obs::event!(debug, base_url = %self.inner.base_url, "session closed");
	}

	/// Returns `true` once [`close`](Self::close) has been called.
	pub fn is_closed(&self) -> bool {
		self.inner.client.read().is_none()
	}

	/// Base URL every request path is resolved against.
	pub fn base_url(&self) -> &Url {
		&self.inner.base_url
	}

	/// Underlying client, exposing its coordinator and request counters.
	pub fn client(&self) -> Result<Arc<AuthenticatedClient>> {
		self.inner.client.read().clone().ok_or(Error::Closed)
	}

	fn assemble(
		config: SessionConfig,
		http_client: ReqwestClient,
		refresher: Arc<dyn Refresher>,
		clock: Arc<dyn Clock>,
	) -> Result<Self> {
		let coordinator = Arc::new(RefreshCoordinator::new(
			config.credentials()?,
			refresher,
			clock,
			config.refresh_policy(),
		));
		let client = AuthenticatedClient::new(
			http_client,
			config.base_url.clone(),
			coordinator,
			config.max_auth_retries,
			config.request_timeout(),
		);

		obs::event!(debug, base_url = %config.base_url, "session opened");

		Ok(Self {
			inner: Arc::new(SessionInner {
				client: RwLock::new(Some(Arc::new(client))),
				base_url: config.base_url,
			}),
		})
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("base_url", &self.inner.base_url.as_str())
			.field("closed", &self.is_closed())
			.finish()
	}
}

struct SessionInner {
	client: RwLock<Option<Arc<AuthenticatedClient>>>,
	base_url: Url,
}

// Closes on drop so a panic or cancellation inside a scope still releases the session.
struct CloseGuard(Session);
impl Drop for CloseGuard {
	fn drop(&mut self) {
		self.0.close();
	}
}

fn build_http_client(config: &SessionConfig) -> Result<ReqwestClient> {
	ReqwestClient::builder()
		.user_agent(config.user_agent.clone())
		.redirect(Policy::none())
		.connect_timeout(config.request_timeout())
		.build()
		.map_err(|e| ConfigError::http_client_build(e).into())
}
