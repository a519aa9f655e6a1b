//! Bearer-authenticated HTTP requests with a bounded corrective cycle on `401`.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use reqwest::{
	Method, Response, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
// self
use crate::{
	_prelude::*,
	auth::TokenState,
	config,
	error::{self, ConfigError, TransientError},
	obs::{self, OpKind, OpOutcome},
	refresh::RefreshCoordinator,
};

/// Protected-resource request description, resendable without re-encoding.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	method: Method,
	path: String,
	query: Vec<(String, String)>,
	headers: HeaderMap,
	body: Option<Vec<u8>>,
	timeout: Option<std::time::Duration>,
}
impl ApiRequest {
	/// Creates a request for `path`, resolved against the session base URL.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			headers: HeaderMap::new(),
			body: None,
			timeout: None,
		}
	}

	/// `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// `POST` request.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// `PUT` request.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::PUT, path)
	}

	/// `DELETE` request.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// Adds a header. `Authorization` is always overwritten by the session.
	pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
		let invalid = || ConfigError::InvalidHeader { name: name.to_owned() };
		let header_name = HeaderName::try_from(name).map_err(|_| invalid())?;
		let header_value = HeaderValue::try_from(value).map_err(|_| invalid())?;

		self.headers.append(header_name, header_value);

		Ok(self)
	}

	/// Merges a prepared header map.
	pub fn headers(mut self, headers: HeaderMap) -> Self {
		self.headers.extend(headers);

		self
	}

	/// Appends a query parameter.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Sets a JSON body and content type.
	pub fn json<T>(mut self, body: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let bytes = serde_json::to_vec(body)
			.map_err(|e| ConfigError::BodySerialize { source: Arc::new(e) })?;

		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		self.body = Some(bytes);

		Ok(self)
	}

	/// Sets a raw body.
	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Overrides the session's default deadline for this request.
	pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// HTTP method.
	pub fn method(&self) -> &Method {
		&self.method
	}

	/// Request path relative to the base URL.
	pub fn path(&self) -> &str {
		&self.path
	}
}

/// Thread-safe counters for protected-resource requests.
#[derive(Debug, Default)]
pub struct RequestMetrics {
	requests: AtomicU64,
	sends: AtomicU64,
	auth_retries: AtomicU64,
}
impl RequestMetrics {
	/// Returns the number of caller-initiated requests.
	pub fn requests(&self) -> u64 {
		self.requests.load(Ordering::Relaxed)
	}

	/// Returns the number of upstream sends (resends included).
	pub fn sends(&self) -> u64 {
		self.sends.load(Ordering::Relaxed)
	}

	/// Returns the number of corrective refresh-and-resend cycles.
	pub fn auth_retries(&self) -> u64 {
		self.auth_retries.load(Ordering::Relaxed)
	}
}

/// Sends requests with a currently valid bearer token and recovers once from `401`.
///
/// Only credential validity is interpreted here. Every other status, redirects and rate
/// limits included, is returned to the caller untouched.
#[derive(Debug)]
pub struct AuthenticatedClient {
	http_client: ReqwestClient,
	base_url: Url,
	coordinator: Arc<RefreshCoordinator>,
	max_auth_retries: u32,
	timeout: std::time::Duration,
	metrics: RequestMetrics,
}
impl AuthenticatedClient {
	/// Creates a client sharing `coordinator` for token acquisition.
	pub fn new(
		http_client: ReqwestClient,
		base_url: Url,
		coordinator: Arc<RefreshCoordinator>,
		max_auth_retries: u32,
		timeout: std::time::Duration,
	) -> Self {
		Self {
			http_client,
			base_url,
			coordinator,
			max_auth_retries,
			timeout,
			metrics: Default::default(),
		}
	}

	/// Coordinator providing tokens to this client.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
		&self.coordinator
	}

	/// Request counters for this client.
	pub fn metrics(&self) -> &RequestMetrics {
		&self.metrics
	}

	/// Sends `request` with a bearer token.
	///
	/// On `401` the token that was used is invalidated, a fresh one is obtained, and the
	/// request is resent; this happens at most `max_auth_retries` times. Exhausting the budget
	/// yields [`Error::InvalidCredentials`], or [`Error::AuthorizationExpired`] when the
	/// budget is zero. Timeouts and transport faults never enter the corrective cycle.
	pub async fn request(&self, request: &ApiRequest) -> Result<Response> {
		self.metrics.requests.fetch_add(1, Ordering::Relaxed);

		obs::observe(OpKind::Request, "request", self.request_with_recovery(request)).await
	}

	async fn request_with_recovery(&self, request: &ApiRequest) -> Result<Response> {
		let url = config::resolve_path(&self.base_url, &request.path)?;
		let mut token = self.coordinator.ensure_valid().await?;
		let mut auth_retries = 0;

		loop {
			let response = self.send(request, &url, &token).await?;

			if response.status() != StatusCode::UNAUTHORIZED {
				return Ok(response);
			}
			if auth_retries >= self.max_auth_retries {
				obs::event!(warn, path = %request.path, auth_retries, "protected endpoint rejected the token");

				return Err(if auth_retries == 0 {
					Error::AuthorizationExpired
				} else {
					Error::InvalidCredentials {
						reason: "protected endpoint rejected a freshly refreshed access token".into(),
					}
				});
			}

			auth_retries += 1;
			self.metrics.auth_retries.fetch_add(1, Ordering::Relaxed);
			obs::record_op_outcome(OpKind::Request, OpOutcome::AuthRetry);
			obs::event!(debug, path = %request.path, auth_retries, "unauthorized response, refreshing token");

			self.coordinator.invalidate(&token);

			token = self.coordinator.ensure_valid().await?;
		}
	}

	async fn send(&self, request: &ApiRequest, url: &Url, token: &TokenState) -> Result<Response> {
		let mut headers = request.headers.clone();

		headers.insert(AUTHORIZATION, bearer(token)?);

		let mut builder = self
			.http_client
			.request(request.method.clone(), url.clone())
			.headers(headers)
			.timeout(request.timeout.unwrap_or(self.timeout));

		if !request.query.is_empty() {
			builder = builder.query(&request.query);
		}
		if let Some(body) = &request.body {
			builder = builder.body(body.clone());
		}

		self.metrics.sends.fetch_add(1, Ordering::Relaxed);

		builder.send().await.map_err(error::map_request_error)
	}
}

fn bearer(token: &TokenState) -> Result<HeaderValue> {
	let mut value = HeaderValue::try_from(format!("Bearer {}", token.access_token().expose()))
		.map_err(|_| TransientError::TokenEndpoint {
			message: "access token is not a valid header value".into(),
			status: None,
			retry_after: None,
		})?;

	value.set_sensitive(true);

	Ok(value)
}
