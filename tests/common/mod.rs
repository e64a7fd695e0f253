//! Fixtures shared by the reqwest-backed integration tests.

#![allow(dead_code)]

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use httpmock::MockServer;
// self
use session_broker::{
	auth::CredentialPair,
	client::ApiClient,
	config::ClientConfig,
	navigation::NavigationPort,
	store::MemoryStore,
	transport::ReqwestTransport,
	url::Url,
};

/// Navigation port that counts teardown signals.
#[derive(Debug, Default)]
pub struct RecordingNavigator(AtomicUsize);
impl RecordingNavigator {
	pub fn fired(&self) -> usize {
		self.0.load(Ordering::SeqCst)
	}
}
impl NavigationPort for RecordingNavigator {
	fn on_unauthenticated(&self) {
		self.0.fetch_add(1, Ordering::SeqCst);
	}
}

/// Client wired to a mock server, plus handles to the store and navigation port behind it.
pub struct Session {
	pub client: Arc<ApiClient<ReqwestTransport>>,
	pub store: MemoryStore,
	pub navigator: Arc<RecordingNavigator>,
}

pub fn base_url(server: &MockServer) -> Url {
	Url::parse(&server.base_url()).expect("Mock server URL should parse.")
}

pub fn session(config: ClientConfig, pair: CredentialPair) -> Session {
	let store = MemoryStore::with_pair(pair);
	let navigator = Arc::new(RecordingNavigator::default());
	let client = ApiClient::new(config, Arc::new(store.clone()), navigator.clone())
		.expect("Reqwest-backed client should build.");

	Session { client: Arc::new(client), store, navigator }
}

pub fn default_session(server: &MockServer, pair: CredentialPair) -> Session {
	let config =
		ClientConfig::builder(base_url(server)).build().expect("Default config should validate.");

	session(config, pair)
}
