//! High-level API client wiring the decorator, interceptor, and refresh coordinator together.

// crates.io
use http::Method;
use serde::de::DeserializeOwned;
// self
#[cfg(feature = "reqwest")] use crate::transport::ReqwestTransport;
use crate::{
	_prelude::*,
	auth::CredentialPair,
	config::ClientConfig,
	intercept::{PendingRequest, ResponseInterceptor},
	navigation::NavigationPort,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, flow_event},
	refresh::{HttpTokenRefresher, RefreshCoordinator, RefreshMetrics, RefreshState, TokenRefresher},
	sign::{BearerSigner, RequestSigner},
	store::CredentialStore,
	transport::{ApiRequest, ApiResponse, ApiTransport},
};

const STATUS_PREVIEW_LIMIT: usize = 256;

/// Authenticated API client.
///
/// Every request is signed with the stored access token. A response whose status is listed in
/// [`ClientConfig::auth_failure_statuses`] triggers one shared refresh cycle and a single
/// replay of the request; concurrent failures join the same cycle.
pub struct ApiClient<T>
where
	T: ?Sized + ApiTransport,
{
	/// Transport used for API calls and the refresh call.
	pub transport: Arc<T>,
	/// Validated client configuration.
	pub config: ClientConfig,
	store: Arc<dyn CredentialStore>,
	signer: Arc<dyn RequestSigner>,
	navigator: Arc<dyn NavigationPort>,
	coordinator: Arc<RefreshCoordinator>,
	interceptor: ResponseInterceptor,
}
impl<T> ApiClient<T>
where
	T: ?Sized + ApiTransport,
{
	/// Creates a client that refreshes through `POST {base_url}{refresh_path}` on `transport`.
	pub fn with_transport(
		config: ClientConfig,
		transport: impl Into<Arc<T>>,
		store: Arc<dyn CredentialStore>,
		navigator: Arc<dyn NavigationPort>,
	) -> Self {
		let transport = transport.into();
		// The coordinator bounds the call with `refresh_timeout`.
		let refresher = HttpTokenRefresher::<T>::new(transport.clone(), config.refresh_url());

		Self::with_refresher(config, transport, store, Arc::new(refresher), navigator)
	}

	/// Creates a client around a custom [`TokenRefresher`].
	pub fn with_refresher(
		config: ClientConfig,
		transport: impl Into<Arc<T>>,
		store: Arc<dyn CredentialStore>,
		refresher: Arc<dyn TokenRefresher>,
		navigator: Arc<dyn NavigationPort>,
	) -> Self {
		let signer: Arc<dyn RequestSigner> = Arc::new(BearerSigner);
		let coordinator = Arc::new(
			RefreshCoordinator::new(store.clone(), refresher, navigator.clone())
				.with_refresh_timeout(config.refresh_timeout),
		);
		let interceptor = ResponseInterceptor::new(
			coordinator.clone(),
			signer.clone(),
			config.auth_failure_statuses.clone(),
		);

		Self {
			transport: transport.into(),
			config,
			store,
			signer,
			navigator,
			coordinator,
			interceptor,
		}
	}

	/// Credential store backing the session.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.store
	}

	/// Coordinator owning the refresh state.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
		&self.coordinator
	}

	/// Current refresh state.
	pub fn refresh_state(&self) -> RefreshState {
		self.coordinator.state()
	}

	/// Refresh cycle counters.
	pub fn refresh_metrics(&self) -> &Arc<RefreshMetrics> {
		self.coordinator.metrics()
	}

	/// Builds a request for `path` relative to the base URL.
	pub fn request(&self, method: Method, path: &str) -> ApiRequest {
		ApiRequest::new(method, self.config.endpoint(path))
	}

	/// Signs and sends `request`, refreshing and replaying it once on an auth failure.
	///
	/// Any response that is not an auth failure is returned as-is, including non-2xx statuses.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let outcome = span.instrument(self.dispatch(request)).await;

		match &outcome {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		outcome
	}

	/// Sends `GET path` and decodes a 2xx JSON body.
	pub async fn get_json<R>(&self, path: &str) -> Result<R>
	where
		R: DeserializeOwned,
	{
		let request = self.request(Method::GET, path);

		self.send_expecting_success(request).await?.json()
	}

	/// Sends `POST path` with a JSON body and decodes a 2xx JSON body.
	pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
	where
		B: ?Sized + Serialize,
		R: DeserializeOwned,
	{
		let request = self.request(Method::POST, path).with_json(body)?;

		self.send_expecting_success(request).await?.json()
	}

	/// Sends `PUT path` with a JSON body and decodes a 2xx JSON body.
	pub async fn put_json<B, R>(&self, path: &str, body: &B) -> Result<R>
	where
		B: ?Sized + Serialize,
		R: DeserializeOwned,
	{
		let request = self.request(Method::PUT, path).with_json(body)?;

		self.send_expecting_success(request).await?.json()
	}

	/// Sends `DELETE path`, ignoring any 2xx body.
	pub async fn delete(&self, path: &str) -> Result<()> {
		let request = self.request(Method::DELETE, path);

		self.send_expecting_success(request).await?;

		Ok(())
	}

	/// Persists a freshly issued pair, e.g. after sign-in.
	pub async fn establish_session(&self, pair: CredentialPair) -> Result<()> {
		self.store.set(pair).await?;

		flow_event!(debug, "Session established.");

		Ok(())
	}

	/// Clears the stored pair and signals the navigation port.
	pub async fn end_session(&self) -> Result<()> {
		self.store.clear().await?;
		self.navigator.on_unauthenticated();

		flow_event!(debug, "Session ended.");

		Ok(())
	}

	async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
		let mut request = request;

		if request.timeout.is_none() {
			request.timeout = self.config.request_timeout;
		}

		let pair = self.store.get().await?;
		let signed = self.signer.sign(request, &pair);
		let pending = PendingRequest::new(signed).signed_with(pair.access_token);
		let outcome = self.transport.send(pending.request().clone()).await;

		self.interceptor.intercept(self.transport.as_ref(), pending, outcome).await
	}

	async fn send_expecting_success(&self, request: ApiRequest) -> Result<ApiResponse> {
		let response = self.send(request).await?;

		if !response.is_success() {
			return Err(Error::Status {
				status: response.status.as_u16(),
				message: response.body_preview(STATUS_PREVIEW_LIMIT),
			});
		}

		Ok(response)
	}
}
#[cfg(feature = "reqwest")]
impl ApiClient<ReqwestTransport> {
	/// Creates a client backed by a fresh reqwest transport.
	pub fn new(
		config: ClientConfig,
		store: Arc<dyn CredentialStore>,
		navigator: Arc<dyn NavigationPort>,
	) -> Result<Self> {
		let client = ReqwestClient::builder().build().map_err(crate::error::ConfigError::from)?;

		Ok(Self::with_transport(config, ReqwestTransport::with_client(client), store, navigator))
	}
}
impl<T> Debug for ApiClient<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("config", &self.config)
			.field("coordinator", &self.coordinator)
			.finish()
	}
}
