//! Demonstrates a scoped session against a local mock of the brokerage API. The first request
//! performs the refresh grant and the session is closed when the scope ends.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use tastytrade_session::{Session, api, config::SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"token_type\":\"Bearer\",\"expires_in\":900}",
			);
		})
		.await;
	let me_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/customers/me").header("authorization", "Bearer demo-access");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"data\":{\"id\":\"me\",\"first-name\":\"Demo\"}}");
		})
		.await;
	let base_url = server.base_url();
	let config = SessionConfig::from_lookup(|name| match name {
		"TASTYTRADE_CLIENT_SECRET" => Some("demo-secret".into()),
		"TASTYTRADE_REFRESH_TOKEN" => Some("demo-refresh".into()),
		"TASTYTRADE_BASE_URL" => Some(base_url.clone()),
		_ => std::env::var(name).ok(),
	})?;
	let customer = Session::scoped(config, |session| async move {
		println!("logged in before first request: {}", session.is_logged_in());

		let response = session.get("/customers/me").await?;
		let customer: serde_json::Value = api::read_data(response).await?;

		println!("token expires at: {:?}", session.token_expires_at());
		println!("session: {session:?}");

		Ok::<_, color_eyre::Report>(customer)
	})
	.await?;

	println!("customer: {customer}");

	token_mock.assert_calls_async(1).await;
	me_mock.assert_calls_async(1).await;

	Ok(())
}
