//! Response interception: turns an authentication failure into one refresh-and-replay.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::TransportError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, flow_event},
	refresh::RefreshCoordinator,
	sign::RequestSigner,
	transport::{ApiRequest, ApiResponse, ApiTransport},
};

/// How the interceptor treats a completed response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
	/// Returned to the caller unchanged.
	Pass,
	/// The access token was rejected.
	AuthFailure,
}

/// Request value paired with its retry mark and the access token it was signed with.
///
/// Marking produces a new value, so the mark travels with the request instead of living in
/// shared mutable state.
#[derive(Clone, Debug)]
pub struct PendingRequest {
	request: ApiRequest,
	signed_with: Option<TokenSecret>,
	retried: bool,
}
impl PendingRequest {
	/// Wraps a request that has not been replayed.
	pub fn new(request: ApiRequest) -> Self {
		Self { request, signed_with: None, retried: false }
	}

	/// Records the access token the request was signed with.
	pub fn signed_with(self, token: Option<TokenSecret>) -> Self {
		Self { signed_with: token, ..self }
	}

	/// Returns the wrapped request.
	pub fn request(&self) -> &ApiRequest {
		&self.request
	}

	/// Access token the request was signed with, if recorded.
	pub fn token(&self) -> Option<&TokenSecret> {
		self.signed_with.as_ref()
	}

	/// Returns `true` once the request has been replayed after a refresh.
	pub fn retried(&self) -> bool {
		self.retried
	}

	/// Returns the same request with its retry mark set.
	pub fn mark_retried(self) -> Self {
		Self { retried: true, ..self }
	}

	/// Unwraps the request.
	pub fn into_request(self) -> ApiRequest {
		self.request
	}
}

/// Inspects completed requests and drives the refresh-and-replay path on auth failures.
pub struct ResponseInterceptor {
	coordinator: Arc<RefreshCoordinator>,
	signer: Arc<dyn RequestSigner>,
	auth_failure_statuses: Vec<u16>,
}
impl ResponseInterceptor {
	/// Creates an interceptor treating `auth_failure_statuses` as rejected access tokens.
	pub fn new(
		coordinator: Arc<RefreshCoordinator>,
		signer: Arc<dyn RequestSigner>,
		auth_failure_statuses: impl Into<Vec<u16>>,
	) -> Self {
		Self { coordinator, signer, auth_failure_statuses: auth_failure_statuses.into() }
	}

	/// Coordinator consulted on auth failures.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
		&self.coordinator
	}

	/// Classifies a completed response.
	pub fn classify(&self, response: &ApiResponse) -> Disposition {
		if self.auth_failure_statuses.contains(&response.status.as_u16()) {
			Disposition::AuthFailure
		} else {
			Disposition::Pass
		}
	}

	/// Resolves the outcome of `pending`.
	///
	/// Non-auth outcomes pass through. An auth failure on a fresh request acquires a token and
	/// replays the request exactly once; an auth failure on a replayed request ends with
	/// [`Error::RetryExhausted`]. Requests flagged with `skip_auth_refresh` end with
	/// [`Error::AuthExpired`] instead of refreshing.
	///
	/// A request signed with a token the store has since replaced is replayed with the stored
	/// token without starting another cycle.
	pub async fn intercept<T>(
		&self,
		transport: &T,
		pending: PendingRequest,
		outcome: Result<ApiResponse, TransportError>,
	) -> Result<ApiResponse>
	where
		T: ?Sized + ApiTransport,
	{
		let mut pending = pending;
		let mut outcome = outcome;

		loop {
			let response = outcome?;

			if self.classify(&response) == Disposition::Pass {
				return Ok(response);
			}

			let status = response.status.as_u16();

			if pending.request().skip_auth_refresh {
				return Err(Error::AuthExpired { status });
			}
			if pending.retried() {
				flow_event!(warn, status, "Request rejected again after a token refresh.");

				return Err(Error::RetryExhausted { status });
			}

			pending = pending.mark_retried();

			let token = match self.rotated_token(&pending).await? {
				Some(token) => {
					flow_event!(debug, "Access token already rotated; replaying without a refresh.");

					token
				},
				None => self.coordinator.acquire_token().await?,
			};

			outcome = self.replay(transport, &pending, &token).await;
		}
	}

	// Stored access token, when it differs from the one `pending` was signed with.
	async fn rotated_token(&self, pending: &PendingRequest) -> Result<Option<TokenSecret>> {
		let Some(signed_with) = pending.token() else {
			return Ok(None);
		};
		let stored = self.coordinator.store().get().await?;

		Ok(stored.access_token.filter(|token| token != signed_with))
	}

	async fn replay<T>(
		&self,
		transport: &T,
		pending: &PendingRequest,
		token: &TokenSecret,
	) -> Result<ApiResponse, TransportError>
	where
		T: ?Sized + ApiTransport,
	{
		const KIND: FlowKind = FlowKind::Replay;

		let span = FlowSpan::new(KIND, "replay");
		let request = self.signer.attach_token(pending.request().clone(), token);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let outcome = span.instrument(transport.send(request)).await;

		match &outcome {
			Ok(response) if self.classify(response) == Disposition::Pass =>
				obs::record_flow_outcome(KIND, FlowOutcome::Success),
			_ => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		outcome
	}
}
impl Debug for ResponseInterceptor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResponseInterceptor")
			.field("coordinator", &self.coordinator)
			.field("auth_failure_statuses", &self.auth_failure_statuses)
			.finish()
	}
}
