//! Authenticated session core for the tastytrade brokerage API: OAuth 2.0 refresh-token
//! exchange, single-flight renewal, and bounded recovery from unauthorized responses.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod api;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod obs;
pub mod refresh;
pub mod session;

pub use session::Session;

#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		clock::{Clock, ManualClock},
		config::SessionConfig,
		session::Session,
	};

	/// Client secret used by test fixtures.
	pub const TEST_CLIENT_SECRET: &str = "test-client-secret";
	/// Refresh token used by test fixtures.
	pub const TEST_REFRESH_TOKEN: &str = "test-refresh-token";

	/// Builds a configuration pointing at a mock server base URL with fast backoff.
	pub fn test_config(base_url: &str) -> SessionConfig {
		SessionConfig::builder(TEST_CLIENT_SECRET, TEST_REFRESH_TOKEN)
			.base_url(Url::parse(base_url).expect("Mock server base URL should parse."))
			.refresh_backoff(std::time::Duration::from_millis(10))
			.build()
			.expect("Test session configuration should validate.")
	}

	/// Opens a session against `base_url` driven by a [`ManualClock`] starting at the current
	/// UTC instant.
	pub fn open_test_session(base_url: &str) -> (Session, Arc<ManualClock>) {
		let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
		let dyn_clock: Arc<dyn Clock> = clock.clone();
		let session = Session::open_with_clock(test_config(base_url), dyn_clock)
			.expect("Test session should open.");

		(session, clock)
	}
}

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::OnceCell as AsyncOnceCell;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
