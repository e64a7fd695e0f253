//! Demonstrates a dashboard firing several requests with an expired access token: one refresh
//! call rotates the pair, every request is replayed once, and the stored session is updated.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use session_broker::{
	auth::CredentialPair,
	client::ApiClient,
	config::ClientConfig,
	navigation::NavigationPort,
	store::{CredentialStore, MemoryStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;

	for (path, body) in [("/stats", "{\"visits\":42}"), ("/alerts", "[]"), ("/profile", "{}")] {
		server
			.mock_async(|when, then| {
				when.method(GET).path(path).header("authorization", "Bearer expired");
				then.status(401);
			})
			.await;
		server
			.mock_async(|when, then| {
				when.method(GET).path(path).header("authorization", "Bearer renewed");
				then.status(200).header("content-type", "application/json").body(body);
			})
			.await;
	}

	let refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"token\":\"renewed\",\"refreshToken\":\"rotated\"}")
				.delay(Duration::from_millis(200));
		})
		.await;
	let store = MemoryStore::with_pair(CredentialPair::new("expired", "original"));
	let navigator: Arc<dyn NavigationPort> =
		Arc::new(|| println!("Session ended; routing to the sign-in screen."));
	let config = ClientConfig::builder(Url::parse(&server.base_url())?).build()?;
	let client = Arc::new(ApiClient::new(config, Arc::new(store.clone()), navigator)?);
	let (stats, alerts, profile) = tokio::try_join!(
		client.get_json::<serde_json::Value>("stats"),
		client.get_json::<serde_json::Value>("alerts"),
		client.get_json::<serde_json::Value>("profile"),
	)?;

	println!("Stats: {stats}. Alerts: {alerts}. Profile: {profile}.");
	println!("Refresh cycles: {}.", client.refresh_metrics().cycles());
	println!("Stored session: {:?}.", store.get().await?);

	refresh_mock.assert_calls_async(1).await;

	Ok(())
}
